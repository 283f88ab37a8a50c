use chrono::Utc;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::assess::{self, AssessmentType};
use crate::calc::{self, OpError};
use crate::grade::GradePolicy;
use crate::sheet::{Block, Cell, Sheet, SheetWriter};
use crate::xlsx;

const GRADED_HEADER: [&str; 6] = [
    "Student Name",
    "RFID",
    "Marks Achieved",
    "Total Marks",
    "Percentage",
    "Grade",
];

const MONTHLY_HEADER: [&str; 10] = [
    "Student Name",
    "RFID",
    "Monthly Marks",
    "Quiz 1",
    "Quiz 2",
    "Quiz 3",
    "Obtained",
    "Out Of",
    "Percentage",
    "Grade",
];

#[derive(Debug, Clone)]
struct AssessmentInstance {
    assessment_id: i64,
    total_marks: f64,
    created_at: String,
}

fn subject_instances(
    conn: &Connection,
    subject_id: i64,
    assessment_type: AssessmentType,
) -> Result<Vec<AssessmentInstance>, OpError> {
    let mut stmt = conn.prepare(
        "SELECT assessment_id, total_marks, created_at
         FROM assessments
         WHERE subject_id = ? AND assessment_type = ?
         ORDER BY created_at ASC, assessment_id ASC",
    )?;
    let instances = stmt
        .query_map((subject_id, assessment_type.as_str()), |r| {
            Ok(AssessmentInstance {
                assessment_id: r.get(0)?,
                total_marks: r.get(1)?,
                created_at: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(instances)
}

/// `"{type} Exam {n} (DD-Mon-YYYY)"`, n counting instances from 1.
fn exam_title(assessment_type: AssessmentType, ordinal: usize, created_at: &str) -> String {
    let mut title = format!("{} Exam {}", assessment_type.as_str(), ordinal);
    if let Ok(when) = assess::parse_created_at(created_at) {
        title.push_str(&format!(" ({})", when.format("%d-%b-%Y")));
    }
    title
}

fn graded_block(
    conn: &Connection,
    instance: &AssessmentInstance,
    assessment_type: AssessmentType,
    ordinal: usize,
    campus_id: i64,
    policy: GradePolicy,
) -> Result<Block, OpError> {
    let rows = calc::graded_assessment_rows(
        conn,
        instance.assessment_id,
        campus_id,
        instance.total_marks,
        policy,
    )?;
    Ok(Block {
        title: exam_title(assessment_type, ordinal, &instance.created_at),
        header: GRADED_HEADER.iter().map(|h| h.to_string()).collect(),
        rows: rows
            .into_iter()
            .map(|r| {
                vec![
                    Cell::text(r.student_name),
                    Cell::text(r.rfid),
                    Cell::number(r.marks_achieved),
                    Cell::number(r.total_marks),
                    Cell::number(r.percentage),
                    Cell::text(r.grade),
                ]
            })
            .collect(),
    })
}

fn monthly_block(
    conn: &Connection,
    instance: &AssessmentInstance,
    ordinal: usize,
    campus_id: i64,
    policy: GradePolicy,
) -> Result<Block, OpError> {
    let rows = calc::monthly_with_quiz_rows(conn, instance.assessment_id, campus_id, policy)?;
    Ok(Block {
        title: exam_title(AssessmentType::Monthly, ordinal, &instance.created_at),
        header: MONTHLY_HEADER.iter().map(|h| h.to_string()).collect(),
        rows: rows
            .into_iter()
            .map(|r| {
                let mut cells = vec![
                    Cell::text(r.student_name),
                    Cell::text(r.rfid),
                    Cell::number(r.monthly_marks),
                ];
                for quiz_number in 0..3 {
                    cells.push(Cell::number(
                        r.quiz_marks.get(quiz_number).copied().unwrap_or(0.0),
                    ));
                }
                cells.push(Cell::number(r.obtained));
                cells.push(Cell::number(r.out_of));
                cells.push(Cell::number(r.percentage));
                cells.push(Cell::text(r.grade));
                cells
            })
            .collect(),
    })
}

/// Variant 1: one subject, one type; one column of blocks, one per
/// historical instance in chronological order.
pub fn assessment_report_sheet(
    conn: &Connection,
    campus_id: i64,
    subject_id: i64,
    assessment_type: AssessmentType,
    policy: GradePolicy,
) -> Result<Sheet, OpError> {
    let instances = subject_instances(conn, subject_id, assessment_type)?;
    if instances.is_empty() {
        return Err(OpError::new(
            "not_found",
            format!(
                "no {} assessments found for subject {}",
                assessment_type.as_str(),
                subject_id
            ),
        ));
    }

    let mut writer = SheetWriter::new();
    for (idx, instance) in instances.iter().enumerate() {
        let block = graded_block(conn, instance, assessment_type, idx + 1, campus_id, policy)?;
        writer.block(&block);
    }
    Ok(writer.finish())
}

fn campus_subjects(
    conn: &Connection,
    campus_id: i64,
    year: i64,
) -> Result<Vec<(i64, String)>, OpError> {
    let mut stmt = conn.prepare(
        "SELECT subject_id, subject_name FROM subjects
         WHERE campus_id = ? AND year = ?
         ORDER BY subject_id",
    )?;
    let subjects = stmt
        .query_map((campus_id, year), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(subjects)
}

/// Variant 2: one type across every subject of a campus+year; one group
/// panel per subject.
pub fn all_subjects_sheet(
    conn: &Connection,
    campus_id: i64,
    year: i64,
    assessment_type: AssessmentType,
    policy: GradePolicy,
) -> Result<Sheet, OpError> {
    let subjects = campus_subjects(conn, campus_id, year)?;
    if subjects.is_empty() {
        return Err(OpError::new(
            "not_found",
            format!("no subjects found for campus {campus_id} year {year}"),
        ));
    }

    let mut writer = SheetWriter::new();
    for (subject_id, subject_name) in subjects {
        writer.heading(&format!("Subject: {} (ID: {})", subject_name, subject_id));
        let instances = subject_instances(conn, subject_id, assessment_type)?;
        if instances.is_empty() {
            writer.note(&format!(
                "No {} assessments found.",
                assessment_type.as_str()
            ));
        } else {
            for (idx, instance) in instances.iter().enumerate() {
                let block =
                    graded_block(conn, instance, assessment_type, idx + 1, campus_id, policy)?;
                writer.block(&block);
            }
        }
        writer.next_panel();
    }
    Ok(writer.finish())
}

/// Variant 3: every subject's Monthly instances with their quiz columns,
/// one panel per subject.
pub fn monthlies_with_quizzes_sheet(
    conn: &Connection,
    campus_id: i64,
    year: i64,
    policy: GradePolicy,
) -> Result<Sheet, OpError> {
    let subjects = campus_subjects(conn, campus_id, year)?;
    if subjects.is_empty() {
        return Err(OpError::new(
            "not_found",
            format!("no subjects found for campus {campus_id} year {year}"),
        ));
    }

    let mut writer = SheetWriter::new();
    for (subject_id, subject_name) in subjects {
        writer.heading(&format!("Subject: {} (ID: {})", subject_name, subject_id));
        let instances = subject_instances(conn, subject_id, AssessmentType::Monthly)?;
        if instances.is_empty() {
            writer.note("No Monthly assessments found.");
        } else {
            for (idx, instance) in instances.iter().enumerate() {
                let block = monthly_block(conn, instance, idx + 1, campus_id, policy)?;
                writer.block(&block);
            }
        }
        writer.next_panel();
    }
    Ok(writer.finish())
}

/// Variant 4: one subject across all assessment types; one panel per type
/// that has instances, Monthly panels carrying the quiz columns.
pub fn subject_report_sheet(
    conn: &Connection,
    campus_id: i64,
    subject_id: i64,
    policy: GradePolicy,
) -> Result<Sheet, OpError> {
    let mut writer = SheetWriter::new();
    let mut wrote_any = false;

    for assessment_type in AssessmentType::ALL {
        let instances = subject_instances(conn, subject_id, assessment_type)?;
        if instances.is_empty() {
            continue;
        }
        wrote_any = true;
        writer.heading(&format!("Assessment Type: {}", assessment_type.as_str()));
        for (idx, instance) in instances.iter().enumerate() {
            let block = if assessment_type == AssessmentType::Monthly {
                monthly_block(conn, instance, idx + 1, campus_id, policy)?
            } else {
                graded_block(conn, instance, assessment_type, idx + 1, campus_id, policy)?
            };
            writer.block(&block);
        }
        writer.next_panel();
    }

    if !wrote_any {
        return Err(OpError::new(
            "not_found",
            format!("no assessments found for subject {subject_id}"),
        ));
    }
    Ok(writer.finish())
}

#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub file_name: String,
    pub file_path: PathBuf,
    pub sha256: String,
    pub bytes: Vec<u8>,
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Renders the sheet to a workbook, persists it under the reports
/// directory with a `{kind}_{scope}_{timestamp}.xlsx` name, records it in
/// `generated_reports`, and hands the bytes back for the response.
pub fn persist_workbook(
    conn: &Connection,
    reports_dir: &Path,
    kind: &str,
    scope: &str,
    sheet_name: &str,
    sheet: &Sheet,
) -> Result<GeneratedReport, OpError> {
    let bytes = xlsx::workbook_bytes(sheet, sheet_name)
        .map_err(|e| OpError::new("report_write_failed", e.to_string()))?;

    let now = Utc::now();
    let file_name = format!(
        "{}_{}_{}.xlsx",
        kind,
        sanitize_component(scope),
        now.format("%Y%m%d%H%M%S")
    );
    std::fs::create_dir_all(reports_dir)
        .map_err(|e| OpError::new("report_write_failed", e.to_string()))?;
    let file_path = reports_dir.join(&file_name);
    std::fs::write(&file_path, &bytes)
        .map_err(|e| OpError::new("report_write_failed", e.to_string()))?;

    let sha256 = format!("{:x}", Sha256::digest(&bytes));
    conn.execute(
        "INSERT INTO generated_reports
         (id, report_kind, scope, file_path, sha256, generated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            kind,
            scope,
            file_path.to_string_lossy(),
            &sha256,
            now.to_rfc3339(),
        ),
    )?;

    Ok(GeneratedReport {
        file_name,
        file_path,
        sha256,
        bytes,
    })
}

/// Guards against path traversal before serving a previously generated
/// workbook back.
pub fn resolve_download(reports_dir: &Path, file_name: &str) -> Result<PathBuf, OpError> {
    if file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name.contains("..")
    {
        return Err(OpError::new("not_found", "report not found"));
    }
    let path = reports_dir.join(file_name);
    if !path.is_file() {
        return Err(OpError::new("not_found", "report not found"));
    }
    Ok(path)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonReport {
    pub report_type: String,
    pub grading: &'static str,
    pub generated_at: String,
    pub data: Vec<calc::ReportEntry>,
}

pub fn subject_json_report(
    conn: &Connection,
    subject_id: i64,
    assessment_type: AssessmentType,
    policy: GradePolicy,
) -> Result<JsonReport, OpError> {
    let data = calc::subject_type_report(conn, subject_id, assessment_type.as_str(), policy)?;
    Ok(JsonReport {
        report_type: assessment_type.as_str().to_string(),
        grading: policy.as_str(),
        generated_at: Utc::now().to_rfc3339(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_titles_carry_the_date() {
        assert_eq!(
            exam_title(AssessmentType::Monthly, 2, "2026-03-05T09:30"),
            "Monthly Exam 2 (05-Mar-2026)"
        );
        // unparseable timestamps degrade to the bare title
        assert_eq!(
            exam_title(AssessmentType::Weekly, 1, "bad"),
            "Weekly Exam 1"
        );
    }

    #[test]
    fn scope_components_are_filename_safe() {
        assert_eq!(sanitize_component("Send Up"), "Send-Up");
        assert_eq!(sanitize_component("s11_Monthly"), "s11-Monthly");
    }

    #[test]
    fn download_rejects_traversal() {
        let dir = std::env::temp_dir();
        assert!(resolve_download(&dir, "../etc/passwd").is_err());
        assert!(resolve_download(&dir, "a/b.xlsx").is_err());
        assert!(resolve_download(&dir, "").is_err());
    }
}
