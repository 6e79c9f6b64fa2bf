//! Accumulates matches into the output sheet.

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::matcher::MatchResult;
use crate::store::{SheetStore, SheetUpdate};
use crate::table::{CellValue, Table};

/// Tracking column holding the matched keywords.
pub const MATCHED_KEYWORD_COLUMN: &str = "matched_keyword";
/// Tracking column holding the searched columns that matched.
pub const MATCHED_COLUMN_COLUMN: &str = "matched_column";
/// Tracking column holding `<file>:<row>` (`<file>:<sheet>:<row>` across sheets).
pub const SOURCE_COLUMN: &str = "source";

pub const TRACKING_COLUMNS: [&str; 3] = [MATCHED_KEYWORD_COLUMN, MATCHED_COLUMN_COLUMN, SOURCE_COLUMN];

/// Output sheet state: existing layout plus rows added during this run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTable {
    sheet: String,
    columns: Vec<String>,
    existing_columns: usize,
    existing_rows: usize,
    header_row: Option<u32>,
    new_rows: Vec<Vec<CellValue>>,
}

impl OutputTable {
    pub fn empty(sheet: &str) -> Self {
        Self {
            sheet: sheet.to_owned(),
            columns: Vec::new(),
            existing_columns: 0,
            existing_rows: 0,
            header_row: None,
            new_rows: Vec::new(),
        }
    }

    pub fn from_existing(sheet: &str, table: Table) -> Self {
        Self {
            sheet: sheet.to_owned(),
            existing_columns: table.columns().len(),
            existing_rows: table.rows().len(),
            header_row: table.header_row(),
            columns: table.columns().to_vec(),
            new_rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn existing_rows(&self) -> usize {
        self.existing_rows
    }

    pub fn new_rows(&self) -> &[Vec<CellValue>] {
        &self.new_rows
    }

    /// Index of `name`, appending it as a new column when absent. Placeholder
    /// (blank) headers are never reused.
    fn column_index(&mut self, name: &str) -> usize {
        match self
            .columns
            .iter()
            .position(|c| !c.is_empty() && c == name)
        {
            Some(i) => i,
            None => {
                self.columns.push(name.to_owned());
                self.columns.len() - 1
            }
        }
    }

    /// Appends one match; `columns` is the source table's header.
    pub fn push(&mut self, columns: &[String], source: &str, m: &MatchResult) {
        let mut placed: Vec<(usize, CellValue)> = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (self.column_index(name), m.row.cell(i).clone()))
            .collect();
        placed.push((
            self.column_index(MATCHED_KEYWORD_COLUMN),
            CellValue::from(m.keywords_display()),
        ));
        placed.push((
            self.column_index(MATCHED_COLUMN_COLUMN),
            CellValue::from(m.columns_display()),
        ));
        placed.push((
            self.column_index(SOURCE_COLUMN),
            CellValue::from(format!("{source}:{}", m.row.number)),
        ));

        let mut row = vec![CellValue::Empty; self.columns.len()];
        for (idx, value) in placed {
            row[idx] = value;
        }
        while row.last().is_some_and(CellValue::is_empty) {
            row.pop();
        }
        self.new_rows.push(row);
    }

    fn into_update(self) -> SheetUpdate {
        SheetUpdate {
            sheet: self.sheet,
            header_row: self.header_row,
            existing_columns: self.existing_columns,
            columns: self.columns,
            rows: self.new_rows,
        }
    }
}

/// Outcome of [`Aggregator::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finalized {
    /// Rows that were (or, on a dry run, would have been) appended.
    pub pending: usize,
    /// Rows actually persisted.
    pub written: usize,
}

/// Owns the output table for one destination sheet.
pub struct Aggregator<'s, S: SheetStore> {
    store: &'s S,
    path: PathBuf,
    table: OutputTable,
}

impl<'s, S: SheetStore> Aggregator<'s, S> {
    /// Loads the destination sheet when it exists, otherwise starts empty.
    pub fn open(store: &'s S, path: &Path, sheet: &str) -> Result<Self> {
        let table = if store.exists(path) {
            match store
                .read_sheet(path, Some(sheet))
                .map_err(|e| Error::io(path, e))?
            {
                Some(grid) => {
                    let existing = Table::from_output_grid(grid)?;
                    info!(
                        "output sheet `{sheet}` has {} existing row(s), {} column(s)",
                        existing.rows().len(),
                        existing.columns().len()
                    );
                    OutputTable::from_existing(sheet, existing)
                }
                None => {
                    info!("output sheet `{sheet}` will be added to {}", path.display());
                    OutputTable::empty(sheet)
                }
            }
        } else {
            info!("output workbook {} will be created", path.display());
            OutputTable::empty(sheet)
        };
        Ok(Self {
            store,
            path: path.to_path_buf(),
            table,
        })
    }

    pub fn table(&self) -> &OutputTable {
        &self.table
    }

    pub fn push(&mut self, columns: &[String], source: &str, m: &MatchResult) {
        debug!(
            "{source}:{} matched [{}]",
            m.row.number,
            m.keywords_display()
        );
        self.table.push(columns, source, m);
    }

    /// Persists the table, or only counts it when `dry_run` is set.
    pub fn finalize(self, dry_run: bool) -> Result<Finalized> {
        let pending = self.table.new_rows.len();
        if dry_run {
            info!("dry run: {pending} row(s) not written");
            return Ok(Finalized {
                pending,
                written: 0,
            });
        }
        if pending == 0 {
            info!("nothing to append; {} left untouched", self.path.display());
            return Ok(Finalized {
                pending,
                written: 0,
            });
        }

        let update = self.table.into_update();
        self.store
            .write_sheet(&self.path, &update)
            .map_err(|e| Error::io(&self.path, e))?;
        info!(
            "appended {pending} row(s) to `{}` in {}",
            update.sheet,
            self.path.display()
        );
        Ok(Finalized {
            pending,
            written: pending,
        })
    }
}
