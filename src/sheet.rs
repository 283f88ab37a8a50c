use std::collections::BTreeMap;

/// Blank rows left after each block's data region.
pub const BLOCK_ROW_GAP: u32 = 3;
/// Blank columns left between group panels.
pub const PANEL_COL_GAP: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn number(value: f64) -> Self {
        Cell::Number(value)
    }
}

/// Sparse grid of cells keyed by (row, col). Iteration is row-major, so a
/// sheet built from the same blocks in the same order always emits the same
/// cell stream.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    cells: BTreeMap<(u32, u32), Cell>,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, row: u32, col: u32, cell: Cell) {
        self.cells.insert((row, col), cell);
    }

    pub fn get(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> impl Iterator<Item = (u32, u32, &Cell)> {
        self.cells.iter().map(|((r, c), cell)| (*r, *c, cell))
    }
}

/// One titled table: a title line, a header row, and data rows.
#[derive(Debug, Clone)]
pub struct Block {
    pub title: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Block {
    pub fn width(&self) -> u32 {
        let data_width = self.rows.iter().map(|r| r.len()).max().unwrap_or(0);
        self.header.len().max(data_width).max(1) as u32
    }
}

/// Cursor-driven writer. Blocks stack downward; `next_panel` starts the
/// next group to the right of the widest block written so far.
#[derive(Debug, Default)]
pub struct SheetWriter {
    sheet: Sheet,
    row: u32,
    col: u32,
    panel_width: u32,
}

impl SheetWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> (u32, u32) {
        (self.row, self.col)
    }

    /// Single heading line, e.g. a subject banner above its blocks.
    pub fn heading(&mut self, text: &str) {
        self.sheet.set(self.row, self.col, Cell::text(text));
        self.row += 1;
        self.panel_width = self.panel_width.max(1);
    }

    /// Single note line followed by the standard block gap.
    pub fn note(&mut self, text: &str) {
        self.sheet.set(self.row, self.col, Cell::text(text));
        self.row += BLOCK_ROW_GAP;
        self.panel_width = self.panel_width.max(1);
    }

    /// Title at the cursor, header and data below it, then the cursor drops
    /// past the data plus the fixed gap.
    pub fn block(&mut self, block: &Block) {
        self.sheet.set(self.row, self.col, Cell::text(&block.title));
        self.row += 1;

        for (i, name) in block.header.iter().enumerate() {
            self.sheet
                .set(self.row, self.col + i as u32, Cell::text(name));
        }
        for (ri, row) in block.rows.iter().enumerate() {
            for (ci, cell) in row.iter().enumerate() {
                self.sheet
                    .set(self.row + 1 + ri as u32, self.col + ci as u32, cell.clone());
            }
        }

        self.row += block.rows.len() as u32 + BLOCK_ROW_GAP;
        self.panel_width = self.panel_width.max(block.width());
    }

    /// Close the current group panel: reset the row cursor and move right
    /// past the widest block in the finished panel.
    pub fn next_panel(&mut self) {
        self.row = 0;
        self.col += self.panel_width + PANEL_COL_GAP;
        self.panel_width = 0;
    }

    pub fn finish(self) -> Sheet {
        self.sheet
    }
}
