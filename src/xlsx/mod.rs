//! Minimal xlsx package access: sheet lookup, cell grid reading and in-place append.

mod create;
mod editor;
mod reader;

pub use create::create_workbook;
pub use editor::XlsxEditor;
pub use reader::{GridRow, SheetGrid, read_sheet};

use anyhow::{Context, Result};
use quick_xml::{Reader, events::Event};
use std::{
    fs::File,
    io::{Read, Seek},
    path::Path,
};

pub(crate) const WORKBOOK_XML: &str = "xl/workbook.xml";
pub(crate) const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
pub(crate) const CONTENT_TYPES: &str = "[Content_Types].xml";
pub(crate) const SHARED_STRINGS: &str = "xl/sharedStrings.xml";

/// A `<sheet>` entry of workbook.xml with its part path resolved through the rels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub path: String,
}

/// Returns sheet names in tab order.
pub fn scan<P: AsRef<Path>>(src: P) -> Result<Vec<String>> {
    let mut zip = zip::ZipArchive::new(File::open(src)?)?;
    Ok(list_sheets(&mut zip)?.into_iter().map(|s| s.name).collect())
}

/// Reads workbook.xml and its rels and pairs every sheet with its worksheet part.
pub(crate) fn list_sheets<R: Read + Seek>(zip: &mut zip::ZipArchive<R>) -> Result<Vec<SheetEntry>> {
    let wb_xml = read_entry(zip, WORKBOOK_XML)?.context("xl/workbook.xml not found")?;
    let rels_xml = read_entry(zip, WORKBOOK_RELS)?.context("xl/_rels/workbook.xml.rels not found")?;
    sheets_from_parts(&wb_xml, &rels_xml)
}

pub(crate) fn sheets_from_parts(wb_xml: &[u8], rels_xml: &[u8]) -> Result<Vec<SheetEntry>> {
    // (name, r:id) in tab order
    let mut tags: Vec<(String, String)> = Vec::new();
    let mut rdr = Reader::from_reader(wb_xml);
    rdr.config_mut().trim_text(true);
    loop {
        match rdr.read_event().context("malformed xl/workbook.xml")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rid = None;
                for a in e.attributes().with_checks(false).flatten() {
                    match a.key.as_ref() {
                        b"name" => name = Some(attr_value(&a.value)),
                        k if k == b"r:id" || a.key.local_name().as_ref() == b"id" => {
                            rid = Some(attr_value(&a.value))
                        }
                        _ => {}
                    }
                }
                if let (Some(n), Some(r)) = (name, rid) {
                    tags.push((n, r));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let mut targets: Vec<(String, String)> = Vec::new();
    let mut rdr = Reader::from_reader(rels_xml);
    rdr.config_mut().trim_text(true);
    loop {
        match rdr.read_event().context("malformed xl/_rels/workbook.xml.rels")? {
            Event::Empty(ref e) | Event::Start(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for a in e.attributes().with_checks(false).flatten() {
                    match a.key.as_ref() {
                        b"Id" => id = Some(attr_value(&a.value)),
                        b"Target" => target = Some(attr_value(&a.value)),
                        _ => {}
                    }
                }
                if let (Some(i), Some(t)) = (id, target) {
                    targets.push((i, t));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    tags.into_iter()
        .map(|(name, rid)| {
            let target = targets
                .iter()
                .find(|(id, _)| id == &rid)
                .map(|(_, t)| t.as_str())
                .with_context(|| format!("relationship {rid} for sheet `{name}` not found"))?;
            Ok(SheetEntry {
                name,
                path: part_path(target),
            })
        })
        .collect()
}

/// Turns a rels `Target` into a path inside the archive.
fn part_path(target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        abs.to_owned()
    } else if target.starts_with("xl/") {
        target.to_owned()
    } else {
        format!("xl/{target}")
    }
}

/// Reads one archive entry; `None` when the part is absent.
pub(crate) fn read_entry<R: Read + Seek>(
    zip: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    let mut f = match zip.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("cannot open {name}")),
    };
    let mut buf = Vec::with_capacity(f.size() as usize);
    f.read_to_end(&mut buf)
        .with_context(|| format!("cannot read {name}"))?;
    Ok(Some(buf))
}

pub(crate) fn attr_value(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    match quick_xml::escape::unescape(&s) {
        Ok(v) => v.into_owned(),
        Err(_) => s.into_owned(),
    }
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/* ========================== COORDINATE HELPERS =========================== */

/// Last row of a worksheet (1-based).
pub const MAX_ROW: u32 = 1_048_576;
/// Last column of a worksheet (0-based, `XFD`).
pub const MAX_COL: u32 = 16_383;

/// 0-based column index to letters: 0 -> "A", 26 -> "AA".
pub fn col_letter(mut n: u32) -> String {
    let mut s = String::new();
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

/// Letters to 0-based column index; `None` for an empty or non-alphabetic prefix.
pub fn col_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    let n = letters.bytes().fold(0u32, |acc, b| {
        acc.saturating_mul(26)
            .saturating_add((b.to_ascii_uppercase() - b'A' + 1) as u32)
    });
    Some(n - 1)
}

/// Splits "C12" into (2, 12). `None` outside `A1:XFD1048576`.
pub fn split_coord(coord: &str) -> Option<(u32, u32)> {
    let p = coord.find(|c: char| c.is_ascii_digit())?;
    let col = col_index(&coord[..p]).filter(|&c| c <= MAX_COL)?;
    let row = parse_row(&coord[p..])?;
    Some((col, row))
}

/// Row number in `1..=MAX_ROW`.
pub fn parse_row(s: &str) -> Option<u32> {
    s.trim()
        .parse::<u32>()
        .ok()
        .filter(|r| (1..=MAX_ROW).contains(r))
}

pub(crate) fn find_bytes(hay: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(hay, needle)
}

pub(crate) fn find_bytes_from(hay: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    memchr::memmem::find(&hay[start..], needle).map(|p| p + start)
}
