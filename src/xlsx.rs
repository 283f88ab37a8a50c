use anyhow::Context;
use std::io::{Cursor, Seek, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::sheet::{Cell, Sheet};

const CONTENT_TYPES: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
    r#"</Types>"#,
);

const ROOT_RELS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#,
    r#"</Relationships>"#,
);

const WORKBOOK_RELS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>"#,
    r#"</Relationships>"#,
);

/// Spreadsheet column name for a 0-based index: A, B, ..., Z, AA, AB, ...
pub fn column_ref(col: u32) -> String {
    let mut n = col;
    let mut name = String::new();
    loop {
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    name
}

pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", column_ref(col), row + 1)
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

fn worksheet_xml(sheet: &Sheet) -> String {
    let mut body = String::from(concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        r#"<sheetData>"#,
    ));

    let mut current_row: Option<u32> = None;
    for (row, col, cell) in sheet.cells() {
        if current_row != Some(row) {
            if current_row.is_some() {
                body.push_str("</row>");
            }
            body.push_str(&format!(r#"<row r="{}">"#, row + 1));
            current_row = Some(row);
        }
        match cell {
            Cell::Text(text) => body.push_str(&format!(
                r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                cell_ref(row, col),
                escape_xml(text)
            )),
            Cell::Number(value) => body.push_str(&format!(
                r#"<c r="{}"><v>{}</v></c>"#,
                cell_ref(row, col),
                value
            )),
        }
    }
    if current_row.is_some() {
        body.push_str("</row>");
    }

    body.push_str("</sheetData></worksheet>");
    body
}

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
            r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
            r#"<sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets>"#,
            r#"</workbook>"#,
        ),
        escape_xml(sheet_name)
    )
}

/// Emits a single-worksheet workbook. Entry order and zip metadata are
/// fixed, so identical sheets produce identical bytes.
pub fn write_workbook<W: Write + Seek>(
    sheet: &Sheet,
    sheet_name: &str,
    out: W,
) -> anyhow::Result<()> {
    let mut zip = ZipWriter::new(out);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", opts)
        .context("failed to start content types entry")?;
    zip.write_all(CONTENT_TYPES.as_bytes())
        .context("failed to write content types entry")?;

    zip.start_file("_rels/.rels", opts)
        .context("failed to start package relationships entry")?;
    zip.write_all(ROOT_RELS.as_bytes())
        .context("failed to write package relationships entry")?;

    zip.start_file("xl/workbook.xml", opts)
        .context("failed to start workbook entry")?;
    zip.write_all(workbook_xml(sheet_name).as_bytes())
        .context("failed to write workbook entry")?;

    zip.start_file("xl/_rels/workbook.xml.rels", opts)
        .context("failed to start workbook relationships entry")?;
    zip.write_all(WORKBOOK_RELS.as_bytes())
        .context("failed to write workbook relationships entry")?;

    zip.start_file("xl/worksheets/sheet1.xml", opts)
        .context("failed to start worksheet entry")?;
    zip.write_all(worksheet_xml(sheet).as_bytes())
        .context("failed to write worksheet entry")?;

    zip.finish().context("failed to finalize workbook")?;
    Ok(())
}

pub fn workbook_bytes(sheet: &Sheet, sheet_name: &str) -> anyhow::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    write_workbook(sheet, sheet_name, &mut buf)?;
    Ok(buf.into_inner())
}
