//! Tabular model: cell values, rows and the column schema they hang off.

use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::xlsx::{SheetGrid, col_letter};

/// A single cell as read from (or written to) a worksheet.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn from_text(s: &str) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s.to_owned())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Bool(true) => f.write_str("TRUE"),
            CellValue::Bool(false) => f.write_str("FALSE"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::from_text(s)
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s)
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

/// One data row. Cells are aligned with the owning table's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based spreadsheet row number.
    pub number: u32,
    cells: Vec<CellValue>,
}

impl Row {
    pub fn new(number: u32, cells: Vec<CellValue>) -> Self {
        Self { number, cells }
    }

    /// Cell at column position `idx`; missing trailing cells read as empty.
    pub fn cell(&self, idx: usize) -> &CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.cells.get(idx).unwrap_or(EMPTY)
    }

    pub fn cells(&self) -> &[CellValue] {
        &self.cells
    }
}

/// Header plus data rows of one sheet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
    /// Spreadsheet row number of the header, `None` for an empty sheet.
    header_row: Option<u32>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            header_row: None,
        }
    }

    /// Builds an input table. The first non-blank row is the header; blank
    /// header cells are named after their column letter. Fully blank data rows
    /// are skipped.
    pub fn from_input_grid(grid: SheetGrid) -> Result<Self> {
        let mut rows = grid.rows.into_iter().filter(|r| !r.is_blank());
        let Some(header) = rows.next() else {
            return Ok(Self::default());
        };
        let data: Vec<_> = rows.collect();

        let width = data
            .iter()
            .map(|r| r.cells.len())
            .chain(std::iter::once(header.cells.len()))
            .max()
            .unwrap_or(0);
        let columns: Vec<String> = (0..width)
            .map(|i| match header.cells.get(i) {
                Some(c) if !c.to_string().trim().is_empty() => c.to_string().trim().to_owned(),
                _ => format!("Column {}", col_letter(i as u32)),
            })
            .collect();
        if let Some(dup) = first_duplicate(&columns) {
            return Err(Error::Schema(format!(
                "sheet `{}` has more than one column named `{dup}`",
                grid.sheet
            )));
        }

        Ok(Self {
            columns,
            rows: data
                .into_iter()
                .map(|r| Row::new(r.number, r.cells))
                .collect(),
            header_row: Some(header.number),
        })
    }

    /// Builds the table of an existing output sheet. Existing content is taken
    /// as-is; only ambiguous headers are rejected.
    pub fn from_output_grid(grid: SheetGrid) -> Result<Self> {
        let mut rows = grid.rows.into_iter().filter(|r| !r.is_blank());
        let Some(header) = rows.next() else {
            return Ok(Self::default());
        };
        let data: Vec<_> = rows.collect();

        let columns: Vec<String> = header
            .cells
            .iter()
            .map(|c| c.to_string().trim().to_owned())
            .collect();
        let named: Vec<String> = columns.iter().filter(|c| !c.is_empty()).cloned().collect();
        if let Some(dup) = first_duplicate(&named) {
            return Err(Error::Schema(format!(
                "existing sheet `{}` has more than one column named `{dup}`",
                grid.sheet
            )));
        }
        for row in &data {
            for (idx, cell) in row.cells.iter().enumerate() {
                let unnamed = columns.get(idx).is_none_or(|c| c.is_empty());
                if unnamed && !cell.is_empty() {
                    return Err(Error::Schema(format!(
                        "existing sheet `{}` has data in {}{} under a column without a header",
                        grid.sheet,
                        col_letter(idx as u32),
                        row.number
                    )));
                }
            }
        }

        Ok(Self {
            columns,
            rows: data
                .into_iter()
                .map(|r| Row::new(r.number, r.cells))
                .collect(),
            header_row: Some(header.number),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn header_row(&self) -> Option<u32> {
        self.header_row
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Ordered `(column, value)` view of a row.
    pub fn record<'a>(&'a self, row: &'a Row) -> impl Iterator<Item = (&'a str, &'a CellValue)> + 'a {
        self.columns
            .iter()
            .enumerate()
            .map(move |(i, c)| (c.as_str(), row.cell(i)))
    }
}

fn first_duplicate(names: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .find(|n| !seen.insert(n.as_str()))
        .map(String::as_str)
}
