use anyhow::{Context, Result, bail};
use quick_xml::{Reader, events::Event};
use std::{fs::File, path::Path};

use super::{
    MAX_COL, MAX_ROW, SHARED_STRINGS, attr_value, list_sheets, parse_row, read_entry, split_coord,
};
use crate::table::CellValue;

/// One `<row>` of a worksheet with cells placed at their column index.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    /// 1-based spreadsheet row number.
    pub number: u32,
    pub cells: Vec<CellValue>,
}

impl GridRow {
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(CellValue::is_empty)
    }
}

/// Cell values of a whole worksheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetGrid {
    pub sheet: String,
    pub rows: Vec<GridRow>,
}

/// Reads a sheet by name, or the first sheet when `sheet` is `None`.
/// Returns `Ok(None)` when the workbook has no such sheet.
pub fn read_sheet<P: AsRef<Path>>(src: P, sheet: Option<&str>) -> Result<Option<SheetGrid>> {
    let src = src.as_ref();
    let file = File::open(src).with_context(|| format!("cannot open {}", src.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("not an xlsx (zip) package")?;

    let sheets = list_sheets(&mut zip)?;
    let entry = match sheet {
        Some(name) => sheets.into_iter().find(|s| s.name == name),
        None => sheets.into_iter().next(),
    };
    let Some(entry) = entry else {
        return Ok(None);
    };

    let shared = match read_entry(&mut zip, SHARED_STRINGS)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet_xml = read_entry(&mut zip, &entry.path)?
        .with_context(|| format!("{} not found", entry.path))?;
    let rows = parse_sheet_rows(&sheet_xml, &shared)
        .with_context(|| format!("malformed {}", entry.path))?;

    Ok(Some(SheetGrid {
        sheet: entry.name,
        rows,
    }))
}

/// Collects `<si>` entries; rich-text runs are concatenated, phonetic runs skipped.
pub(crate) fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut rdr = Reader::from_reader(xml);
    let mut out = Vec::new();
    let mut raw = String::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut phonetic = 0usize;

    loop {
        match rdr.read_event().context("malformed xl/sharedStrings.xml")? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    raw.clear();
                }
                b"rPh" => phonetic += 1,
                b"t" if in_si && phonetic == 0 => in_t = true,
                _ => {}
            },
            Event::Empty(ref e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::End(ref e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = false;
                    out.push(unescape_text(&raw));
                }
                b"rPh" => phonetic = phonetic.saturating_sub(1),
                b"t" => in_t = false,
                _ => {}
            },
            Event::Text(ref e) if in_t => raw.push_str(&String::from_utf8_lossy(e)),
            Event::CData(ref e) if in_t => raw.push_str(&xml_escape_text(&String::from_utf8_lossy(e))),
            Event::GeneralRef(ref e) if in_t => {
                raw.push('&');
                raw.push_str(&String::from_utf8_lossy(e));
                raw.push(';');
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

#[derive(Clone, Copy, PartialEq)]
enum Capture {
    Off,
    Value,
    Inline,
}

/// Walks `<sheetData>` and builds rows. Rows without cells are kept so row
/// numbers stay aligned with the file; callers decide what blank means.
pub(crate) fn parse_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<GridRow>> {
    let mut rdr = Reader::from_reader(xml);
    let mut rows: Vec<GridRow> = Vec::new();

    let mut next_row = 1u32;
    let mut next_col = 0u32;
    let mut cell_col = 0u32;
    let mut cell_type: Option<String> = None;
    let mut in_cell = false;
    let mut capture = Capture::Off;
    let mut phonetic = 0usize;
    let mut raw = String::new();

    loop {
        match rdr.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                let number = match e
                    .attributes()
                    .with_checks(false)
                    .flatten()
                    .find(|a| a.key.as_ref() == b"r")
                {
                    Some(a) => {
                        let r = attr_value(&a.value);
                        parse_row(&r).with_context(|| format!("invalid row reference `{r}`"))?
                    }
                    None if next_row <= MAX_ROW => next_row,
                    None => bail!("more than {MAX_ROW} rows"),
                };
                rows.push(GridRow {
                    number,
                    cells: Vec::new(),
                });
                next_row = number + 1;
                next_col = 0;
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"c" => {
                let (col, t) = cell_attrs(e, next_col)?;
                cell_col = col;
                cell_type = t;
                in_cell = true;
                raw.clear();
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                let (col, _) = cell_attrs(e, next_col)?;
                next_col = col + 1;
            }
            Event::Start(ref e) if in_cell => match e.local_name().as_ref() {
                b"v" => capture = Capture::Value,
                b"rPh" => phonetic += 1,
                b"t" if phonetic == 0 => capture = Capture::Inline,
                _ => {}
            },
            Event::End(ref e) => match e.local_name().as_ref() {
                b"c" if in_cell => {
                    let value = cell_value(cell_type.as_deref(), &unescape_text(&raw), shared)?;
                    let Some(row) = rows.last_mut() else {
                        bail!("cell outside of <row>");
                    };
                    let idx = cell_col as usize;
                    if row.cells.len() <= idx {
                        row.cells.resize(idx + 1, CellValue::Empty);
                    }
                    row.cells[idx] = value;
                    next_col = cell_col + 1;
                    in_cell = false;
                    capture = Capture::Off;
                }
                b"v" | b"t" => capture = Capture::Off,
                b"rPh" => phonetic = phonetic.saturating_sub(1),
                _ => {}
            },
            Event::Text(ref e) if capture != Capture::Off => {
                raw.push_str(&String::from_utf8_lossy(e))
            }
            Event::CData(ref e) if capture != Capture::Off => {
                raw.push_str(&xml_escape_text(&String::from_utf8_lossy(e)))
            }
            Event::GeneralRef(ref e) if capture != Capture::Off => {
                raw.push('&');
                raw.push_str(&String::from_utf8_lossy(e));
                raw.push(';');
            }
            Event::Eof => break,
            _ => {}
        }
    }

    for row in &mut rows {
        while row.cells.last().is_some_and(CellValue::is_empty) {
            row.cells.pop();
        }
    }
    Ok(rows)
}

/// Column index and `t` of a `<c>`; a present but unusable `r` is an error.
fn cell_attrs(
    e: &quick_xml::events::BytesStart<'_>,
    fallback_col: u32,
) -> Result<(u32, Option<String>)> {
    let mut col = fallback_col;
    let mut t = None;
    for a in e.attributes().with_checks(false).flatten() {
        match a.key.as_ref() {
            b"r" => {
                let r = attr_value(&a.value);
                col = split_coord(&r)
                    .map(|(c, _)| c)
                    .with_context(|| format!("invalid cell reference `{r}`"))?;
            }
            b"t" => t = Some(attr_value(&a.value)),
            _ => {}
        }
    }
    if col > MAX_COL {
        bail!("more than {} columns", MAX_COL + 1);
    }
    Ok((col, t))
}

fn cell_value(t: Option<&str>, text: &str, shared: &[String]) -> Result<CellValue> {
    if text.is_empty() {
        return Ok(CellValue::Empty);
    }
    let value = match t {
        Some("s") => {
            let idx: usize = text
                .trim()
                .parse()
                .with_context(|| format!("bad shared string index `{text}`"))?;
            let s = shared
                .get(idx)
                .with_context(|| format!("shared string {idx} out of range"))?;
            CellValue::from_text(s)
        }
        Some("b") => CellValue::Bool(text.trim() == "1"),
        Some("inlineStr") | Some("str") | Some("e") => CellValue::from_text(text),
        _ => match text.trim().parse::<f64>() {
            Ok(n) => CellValue::Number(n),
            Err(_) => CellValue::from_text(text),
        },
    };
    Ok(value)
}

fn unescape_text(raw: &str) -> String {
    match quick_xml::escape::unescape(raw) {
        Ok(s) => s.into_owned(),
        Err(_) => raw.to_owned(),
    }
}

// CDATA content is literal; escape it so the final unescape pass leaves it intact.
fn xml_escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
}
