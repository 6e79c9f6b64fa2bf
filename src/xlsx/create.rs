use anyhow::{Context, Result};
use rust_xlsxwriter::{ColNum, Format, Workbook, Worksheet};
use std::{io::Write, path::Path};

use super::editor::temp_file_for;
use crate::table::CellValue;

/// Writes a fresh single-sheet workbook: header in row 1, `rows` below it.
pub fn create_workbook(
    path: &Path,
    sheet: &str,
    columns: &[String],
    rows: &[Vec<CellValue>],
) -> Result<()> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name(sheet)
        .with_context(|| format!("invalid sheet name `{sheet}`"))?;

    for (col, name) in columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col_num(col)?, name, &header_format)?;
    }
    for (idx, row) in rows.iter().enumerate() {
        let row_num = u32::try_from(idx + 1).context("too many rows")?;
        for (col, value) in row.iter().enumerate() {
            write_value(worksheet, row_num, col_num(col)?, value)?;
        }
    }

    let buf = workbook.save_to_buffer()?;
    let mut tmp = temp_file_for(path)?;
    tmp.write_all(&buf)?;
    tmp.persist(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}

fn col_num(idx: usize) -> Result<ColNum> {
    ColNum::try_from(idx).context("too many columns")
}

fn write_value(ws: &mut Worksheet, row: u32, col: ColNum, value: &CellValue) -> Result<()> {
    match value {
        CellValue::Empty => {}
        CellValue::Text(s) => {
            ws.write_string(row, col, s)?;
        }
        CellValue::Number(n) if n.is_finite() => {
            ws.write_number(row, col, *n)?;
        }
        CellValue::Number(n) => {
            ws.write_string(row, col, n.to_string())?;
        }
        CellValue::Bool(b) => {
            ws.write_boolean(row, col, *b)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlsx::{GridRow, read_sheet, scan};

    #[test]
    fn new_workbook_reads_back_typed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.xlsx");
        create_workbook(
            &path,
            "results",
            &["Message".to_owned(), "Count".to_owned(), "Ok".to_owned()],
            &[vec![
                CellValue::from("fail: disk"),
                CellValue::Number(3.0),
                CellValue::Bool(false),
            ]],
        )?;

        assert_eq!(scan(&path)?, ["results"]);
        let grid = read_sheet(&path, Some("results"))?.context("sheet missing")?;
        assert_eq!(grid.rows.len(), 2);
        assert_eq!(
            grid.rows[1],
            GridRow {
                number: 2,
                cells: vec![
                    CellValue::from("fail: disk"),
                    CellValue::Number(3.0),
                    CellValue::Bool(false)
                ],
            }
        );
        Ok(())
    }
}
