//! The two workbook capabilities the pipeline depends on.

use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use crate::table::CellValue;
use crate::xlsx::{self, SheetGrid, XlsxEditor};

/// Everything needed to bring a sheet up to date.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetUpdate {
    pub sheet: String,
    /// Header row of the existing sheet; `None` when the sheet is new or empty.
    pub header_row: Option<u32>,
    /// How many of `columns` the existing header already has.
    pub existing_columns: usize,
    pub columns: Vec<String>,
    /// New rows, aligned with `columns`.
    pub rows: Vec<Vec<CellValue>>,
}

impl SheetUpdate {
    pub fn new_columns(&self) -> &[String] {
        &self.columns[self.existing_columns.min(self.columns.len())..]
    }
}

/// Read/write access to named sheets of a workbook file.
pub trait SheetStore {
    fn exists(&self, path: &Path) -> bool;

    /// Sheet names in workbook order.
    fn sheet_names(&self, path: &Path) -> Result<Vec<String>>;

    /// `sheet = None` selects the first sheet. `Ok(None)` if the workbook has no such sheet.
    fn read_sheet(&self, path: &Path, sheet: Option<&str>) -> Result<Option<SheetGrid>>;

    /// Persists `update` so that other sheets stay untouched and a failed
    /// write leaves the previous file in place.
    fn write_sheet(&self, path: &Path, update: &SheetUpdate) -> Result<()>;
}

/// [`SheetStore`] over `.xlsx` files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct XlsxStore;

impl SheetStore for XlsxStore {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn sheet_names(&self, path: &Path) -> Result<Vec<String>> {
        xlsx::scan(path).with_context(|| format!("cannot list sheets of {}", path.display()))
    }

    fn read_sheet(&self, path: &Path, sheet: Option<&str>) -> Result<Option<SheetGrid>> {
        xlsx::read_sheet(path, sheet)
    }

    fn write_sheet(&self, path: &Path, update: &SheetUpdate) -> Result<()> {
        if !path.exists() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create directory {}", dir.display()))?;
            }
            debug!("creating new workbook {}", path.display());
            return xlsx::create_workbook(path, &update.sheet, &update.columns, &update.rows);
        }

        let mut editor = match XlsxEditor::open(path, &update.sheet)? {
            Some(editor) => editor,
            None => {
                debug!("adding sheet `{}` to {}", update.sheet, path.display());
                XlsxEditor::open_with_new_sheet(path, &update.sheet)?
            }
        };

        match update.header_row {
            Some(row) => editor.extend_header(row, update.existing_columns, update.new_columns())?,
            None => editor.append_rows(std::iter::once(
                update.columns.iter().map(|c| CellValue::from_text(c)).collect::<Vec<_>>(),
            ))?,
        }
        editor.append_rows(update.rows.iter().cloned())?;
        editor.update_dimension(update.columns.len())?;
        editor.save(path)
    }
}
