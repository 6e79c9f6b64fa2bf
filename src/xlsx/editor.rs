use anyhow::{Context, Result, bail};
use log::debug;
use quick_xml::{Reader, Writer, events::BytesText, events::Event};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

use super::{
    CONTENT_TYPES, MAX_COL, MAX_ROW, WORKBOOK_RELS, WORKBOOK_XML, attr_value, col_letter, find_bytes,
    find_bytes_from, parse_row, read_entry, sheets_from_parts, split_coord, xml_escape,
};
use crate::table::CellValue;

const WORKSHEET_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const WORKSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const EMPTY_SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData/></worksheet>"#;

/// Edits one worksheet of an existing workbook in place. Only the touched
/// parts are rewritten on save; every other archive entry is copied raw.
pub struct XlsxEditor {
    src_path: PathBuf,
    sheet_path: String,
    sheet_xml: Vec<u8>,
    last_row: u32,
    workbook_xml: Vec<u8>,
    rels_xml: Vec<u8>,
    content_types_xml: Vec<u8>,
    /// The sheet part does not exist in the source archive yet.
    new_sheet: bool,
}

struct Package {
    entries: Vec<String>,
    workbook_xml: Vec<u8>,
    rels_xml: Vec<u8>,
    content_types_xml: Vec<u8>,
}

fn load_package(zip: &mut ZipArchive<File>) -> Result<Package> {
    let entries = zip.file_names().map(str::to_owned).collect();
    let workbook_xml = read_entry(zip, WORKBOOK_XML)?.context("xl/workbook.xml not found")?;
    let rels_xml =
        read_entry(zip, WORKBOOK_RELS)?.context("xl/_rels/workbook.xml.rels not found")?;
    let content_types_xml =
        read_entry(zip, CONTENT_TYPES)?.context("[Content_Types].xml not found")?;
    Ok(Package {
        entries,
        workbook_xml,
        rels_xml,
        content_types_xml,
    })
}

/// Work with files
impl XlsxEditor {
    /// Opens `sheet_name` for editing; `Ok(None)` when the workbook has no such sheet.
    pub fn open<P: AsRef<Path>>(src: P, sheet_name: &str) -> Result<Option<Self>> {
        let src_path = src.as_ref().to_path_buf();
        let mut zip = ZipArchive::new(
            File::open(&src_path).with_context(|| format!("cannot open {}", src_path.display()))?,
        )
        .context("not an xlsx (zip) package")?;
        let pkg = load_package(&mut zip)?;

        let sheets = sheets_from_parts(&pkg.workbook_xml, &pkg.rels_xml)?;
        let Some(entry) = sheets.into_iter().find(|s| s.name == sheet_name) else {
            return Ok(None);
        };
        let sheet_xml = read_entry(&mut zip, &entry.path)?
            .with_context(|| format!("{} not found", entry.path))?;
        let last_row = calc_last_row(&sheet_xml)?;
        debug!("sheet `{sheet_name}` is {} (last row {last_row})", entry.path);

        Ok(Some(Self {
            src_path,
            sheet_path: entry.path,
            sheet_xml,
            last_row,
            workbook_xml: pkg.workbook_xml,
            rels_xml: pkg.rels_xml,
            content_types_xml: pkg.content_types_xml,
            new_sheet: false,
        }))
    }

    /// Opens the workbook and registers a new empty sheet `sheet_name` as the last tab.
    pub fn open_with_new_sheet<P: AsRef<Path>>(src: P, sheet_name: &str) -> Result<Self> {
        let src_path = src.as_ref().to_path_buf();
        let mut zip = ZipArchive::new(
            File::open(&src_path).with_context(|| format!("cannot open {}", src_path.display()))?,
        )
        .context("not an xlsx (zip) package")?;
        let Package {
            entries,
            mut workbook_xml,
            mut rels_xml,
            mut content_types_xml,
        } = load_package(&mut zip)?;

        let sheets = sheets_from_parts(&workbook_xml, &rels_xml)?;
        if sheets.iter().any(|s| s.name == sheet_name) {
            bail!("sheet `{sheet_name}` already exists");
        }

        // free sheetId / rId / sheet#.xml
        let new_sheet_id = max_attr_number(&workbook_xml, b"sheet", b"sheetId", "")? + 1;
        let new_rid = max_attr_number(&rels_xml, b"Relationship", b"Id", "rId")? + 1;
        let new_sheet_file = entries
            .iter()
            .filter_map(|name| {
                name.strip_prefix("xl/worksheets/sheet")
                    .and_then(|s| s.strip_suffix(".xml"))
                    .and_then(|s| s.parse::<u32>().ok())
            })
            .max()
            .unwrap_or(0)
            + 1;
        let sheet_path = format!("xl/worksheets/sheet{new_sheet_file}.xml");

        let sheet_tag = format!(
            r#"<sheet name="{}" sheetId="{new_sheet_id}" r:id="rId{new_rid}"/>"#,
            xml_escape(sheet_name)
        );
        let pos = memchr::memmem::rfind(&workbook_xml, b"</sheets>")
            .context("</sheets> not found in workbook.xml")?;
        workbook_xml.splice(pos..pos, sheet_tag.bytes());

        let rel_tag = format!(
            r#"<Relationship Id="rId{new_rid}" Type="{WORKSHEET_REL_TYPE}" Target="worksheets/sheet{new_sheet_file}.xml"/>"#
        );
        let pos = memchr::memmem::rfind(&rels_xml, b"</Relationships>")
            .context("</Relationships> not found in workbook.xml.rels")?;
        rels_xml.splice(pos..pos, rel_tag.bytes());

        let override_tag = format!(
            r#"<Override PartName="/{sheet_path}" ContentType="{WORKSHEET_CONTENT_TYPE}"/>"#
        );
        let pos = memchr::memmem::rfind(&content_types_xml, b"</Types>")
            .context("</Types> not found in [Content_Types].xml")?;
        content_types_xml.splice(pos..pos, override_tag.bytes());

        debug!("new sheet `{sheet_name}` -> {sheet_path} (sheetId {new_sheet_id}, rId{new_rid})");
        Ok(Self {
            src_path,
            sheet_path,
            sheet_xml: EMPTY_SHEET.as_bytes().to_vec(),
            last_row: 0,
            workbook_xml,
            rels_xml,
            content_types_xml,
            new_sheet: true,
        })
    }

    /// Writes the workbook to `dst` through a temporary file in the same
    /// directory, renamed over the destination once complete.
    pub fn save<P: AsRef<Path>>(&self, dst: P) -> Result<()> {
        let dst = dst.as_ref();
        let mut tmp = temp_file_for(dst)?;
        {
            let mut zin = ZipArchive::new(File::open(&self.src_path)?)?;
            let mut zout = ZipWriter::new(tmp.as_file_mut());
            let opt = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(1));

            for i in 0..zin.len() {
                let file = zin.by_index_raw(i)?;
                let name = file.name().to_owned();
                let replaced: Option<&[u8]> = match name.as_str() {
                    WORKBOOK_XML => Some(&self.workbook_xml),
                    WORKBOOK_RELS => Some(&self.rels_xml),
                    CONTENT_TYPES => Some(&self.content_types_xml),
                    n if n == self.sheet_path => Some(&self.sheet_xml),
                    _ => None,
                };
                match replaced {
                    Some(content) => {
                        drop(file);
                        zout.start_file(name.as_str(), opt)?;
                        zout.write_all(content)?;
                    }
                    None => zout.raw_copy_file(file)?,
                }
            }
            if self.new_sheet {
                zout.start_file(self.sheet_path.as_str(), opt)?;
                zout.write_all(&self.sheet_xml)?;
            }
            zout.finish()?;
        }
        tmp.persist(dst)
            .with_context(|| format!("cannot replace {}", dst.display()))?;
        Ok(())
    }
}

/// Temp file beside `dst` so the final rename stays on one filesystem.
/// It carries the permissions of `dst`, or the usual ones for a new file,
/// since the rename replaces the destination's inode.
pub(crate) fn temp_file_for(dst: &Path) -> Result<NamedTempFile> {
    let dir = dst
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("cannot create temporary file in {}", dir.display()))?;
    let perms = match fs::metadata(dst) {
        Ok(meta) => Some(meta.permissions()),
        Err(_) => new_file_permissions(),
    };
    if let Some(perms) = perms {
        tmp.as_file()
            .set_permissions(perms)
            .with_context(|| format!("cannot set permissions for {}", dst.display()))?;
    }
    Ok(tmp)
}

#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}

/// Main
impl XlsxEditor {
    pub fn last_row(&self) -> u32 {
        self.last_row
    }

    /// Appends rows after the last existing row. Empty cells are omitted.
    pub fn append_rows<R, I>(&mut self, rows: R) -> Result<()>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = CellValue>,
    {
        let mut bulk_rows_xml = Vec::<u8>::new();

        for row in rows {
            if self.last_row >= MAX_ROW {
                bail!("sheet is full: row {MAX_ROW} already used");
            }
            self.last_row += 1;
            let row_num = self.last_row;

            let mut writer = Writer::new(Vec::new());
            writer
                .create_element("row")
                .with_attribute(("r", row_num.to_string().as_str()))
                .write_inner_content(|w| {
                    for (col_idx, val) in row.into_iter().enumerate() {
                        if val.is_empty() {
                            continue;
                        }
                        if col_idx > MAX_COL as usize {
                            return Err(std::io::Error::other(format!(
                                "more than {} columns",
                                MAX_COL + 1
                            )));
                        }
                        let coord = format!("{}{}", col_letter(col_idx as u32), row_num);
                        write_cell(w, &coord, &val)?;
                    }
                    Ok(())
                })?;

            bulk_rows_xml.extend_from_slice(&writer.into_inner());
        }

        self.insert_before_sheet_data_end(bulk_rows_xml)
    }

    fn insert_before_sheet_data_end(&mut self, xml: Vec<u8>) -> Result<()> {
        if xml.is_empty() {
            return Ok(());
        }
        if let Some(pos) = memchr::memmem::rfind(&self.sheet_xml, b"</sheetData>") {
            self.sheet_xml.splice(pos..pos, xml);
            return Ok(());
        }
        // <sheetData/> of an empty sheet
        let start = find_bytes(&self.sheet_xml, b"<sheetData").context("<sheetData> not found")?;
        let end = find_bytes_from(&self.sheet_xml, b">", start).context("malformed <sheetData>")?;
        if self.sheet_xml[end - 1] != b'/' {
            bail!("</sheetData> tag not found");
        }
        let mut replacement = b"<sheetData>".to_vec();
        replacement.extend_from_slice(&xml);
        replacement.extend_from_slice(b"</sheetData>");
        self.sheet_xml.splice(start..end + 1, replacement);
        Ok(())
    }

    /// Writes `names` into the header row starting at column `first_col`.
    pub fn extend_header(&mut self, header_row: u32, first_col: usize, names: &[String]) -> Result<()> {
        for (offset, name) in names.iter().enumerate() {
            let coord = format!("{}{}", col_letter((first_col + offset) as u32), header_row);
            self.set_cell(&coord, &CellValue::from_text(name))?;
        }
        Ok(())
    }

    /// Replaces (or creates) one cell, keeping cells and rows in column/row order.
    pub fn set_cell(&mut self, coord: &str, value: &CellValue) -> Result<()> {
        let (target_col, row_num) =
            split_coord(coord).with_context(|| format!("invalid cell coordinate `{coord}`"))?;

        let mut cell_writer = Writer::new(Vec::new());
        write_cell(&mut cell_writer, coord, value)?;
        let cell_xml = cell_writer.into_inner();

        let rows = row_spans(&self.sheet_xml);
        if let Some(span) = rows.iter().find(|s| s.number == row_num) {
            if span.self_closing {
                // <row .../>  ->  <row ...>cell</row>
                let mut open = self.sheet_xml[span.start..span.end - 2].to_vec();
                while open.last().is_some_and(|b| b.is_ascii_whitespace()) {
                    open.pop();
                }
                open.push(b'>');
                open.extend_from_slice(&cell_xml);
                open.extend_from_slice(b"</row>");
                self.sheet_xml.splice(span.start..span.end, open);
                return Ok(());
            }

            let content_end = span.end - "</row>".len();
            let mut row_slice = self.sheet_xml[span.content..content_end].to_vec();
            let cells = cell_spans(&row_slice);
            if let Some(existing) = cells.iter().find(|c| c.col == target_col) {
                row_slice.drain(existing.start..existing.end);
            }
            let insert_pos = cell_spans(&row_slice)
                .iter()
                .find(|c| c.col > target_col)
                .map(|c| c.start)
                .unwrap_or(row_slice.len());
            row_slice.splice(insert_pos..insert_pos, cell_xml);
            self.sheet_xml.splice(span.content..content_end, row_slice);
        } else {
            let mut new_row_xml = Vec::new();
            new_row_xml.extend_from_slice(format!("<row r=\"{row_num}\">").as_bytes());
            new_row_xml.extend_from_slice(&cell_xml);
            new_row_xml.extend_from_slice(b"</row>");

            // keep <row> elements sorted by r
            match rows.iter().find(|s| s.number > row_num) {
                Some(next) => {
                    self.sheet_xml.splice(next.start..next.start, new_row_xml);
                }
                None => self.insert_before_sheet_data_end(new_row_xml)?,
            }
        }

        if row_num > self.last_row {
            self.last_row = row_num;
        }
        Ok(())
    }

    /// Grows `<dimension ref>` to cover `width` columns and the last row.
    pub fn update_dimension(&mut self, width: usize) -> Result<()> {
        if width == 0 || self.last_row == 0 {
            return Ok(());
        }
        let Some(tag) = find_bytes(&self.sheet_xml, b"<dimension") else {
            return Ok(());
        };
        let attr = b"ref=\"";
        let start = find_bytes_from(&self.sheet_xml, attr, tag).context("<dimension> without ref")?
            + attr.len();
        let end = find_bytes_from(&self.sheet_xml, b"\"", start).context("closing quote not found")?;
        let current = std::str::from_utf8(&self.sheet_xml[start..end])?.to_owned();

        let (first, last) = match current.split_once(':') {
            Some((a, b)) => (a.to_owned(), Some(b.to_owned())),
            None => (current.clone(), None),
        };
        let widest = u32::try_from(width - 1).unwrap_or(MAX_COL).min(MAX_COL);
        let (mut max_col, mut max_row) = (widest, self.last_row);
        if let Some((c, r)) = last.as_deref().and_then(split_coord) {
            max_col = max_col.max(c);
            max_row = max_row.max(r);
        }
        let updated = format!("{first}:{}{max_row}", col_letter(max_col));
        self.sheet_xml.splice(start..end, updated.bytes());
        Ok(())
    }
}

/// One cell element. Empty values still produce `<c r=".."/>` so a stale
/// value at the same coordinate is cleared.
fn write_cell<W: Write>(w: &mut Writer<W>, coord: &str, value: &CellValue) -> std::io::Result<()> {
    let c_elem = w.create_element("c").with_attribute(("r", coord));
    match value {
        CellValue::Empty => {
            c_elem.write_empty()?;
        }
        CellValue::Number(n) if n.is_finite() => {
            c_elem.write_inner_content(|w2| {
                w2.create_element("v")
                    .write_text_content(BytesText::new(&n.to_string()))?;
                Ok(())
            })?;
        }
        CellValue::Bool(b) => {
            c_elem
                .with_attribute(("t", "b"))
                .write_inner_content(|w2| {
                    w2.create_element("v")
                        .write_text_content(BytesText::new(if *b { "1" } else { "0" }))?;
                    Ok(())
                })?;
        }
        other => {
            let text = other.to_string();
            c_elem
                .with_attribute(("t", "inlineStr"))
                .write_inner_content(|w2| {
                    w2.create_element("is").write_inner_content(|w3| {
                        let t = w3.create_element("t");
                        let t = if text.trim() != text {
                            t.with_attribute(("xml:space", "preserve"))
                        } else {
                            t
                        };
                        t.write_text_content(BytesText::new(&text))?;
                        Ok(())
                    })?;
                    Ok(())
                })?;
        }
    }
    Ok(())
}

/// Byte range of a `<row>` element inside the sheet XML.
#[derive(Debug, Clone, Copy)]
struct RowSpan {
    number: u32,
    start: usize,
    /// First byte after the start tag.
    content: usize,
    /// First byte after `</row>` (or after `/>`).
    end: usize,
    self_closing: bool,
}

#[derive(Debug, Clone, Copy)]
struct CellSpan {
    col: u32,
    start: usize,
    end: usize,
}

/// Start positions of `<name` tags (not `<nameOther`).
fn tag_starts(xml: &[u8], name: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(p) = find_bytes_from(xml, name, pos) {
        let next = xml.get(p + name.len()).copied();
        if matches!(next, Some(b' ' | b'>' | b'/' | b'\t' | b'\r' | b'\n')) {
            out.push(p);
        }
        pos = p + name.len();
    }
    out
}

fn ref_attr(tag: &[u8]) -> Option<String> {
    let mut pos = 0;
    while let Some(p) = find_bytes_from(tag, b"r=\"", pos) {
        if p > 0 && tag[p - 1].is_ascii_whitespace() {
            let start = p + 3;
            let end = find_bytes_from(tag, b"\"", start)?;
            return Some(attr_value(&tag[start..end]));
        }
        pos = p + 3;
    }
    None
}

fn row_spans(xml: &[u8]) -> Vec<RowSpan> {
    let mut spans = Vec::new();
    let mut next_number = 1u32;
    let mut min_pos = 0;
    for start in tag_starts(xml, b"<row") {
        if start < min_pos {
            continue;
        }
        let Some(gt) = find_bytes_from(xml, b">", start) else {
            break;
        };
        let tag = &xml[start..gt];
        let number = ref_attr(tag)
            .and_then(|r| parse_row(&r))
            .unwrap_or(next_number);
        let self_closing = xml[gt - 1] == b'/';
        let end = if self_closing {
            gt + 1
        } else {
            match find_bytes_from(xml, b"</row>", gt) {
                Some(close) => close + "</row>".len(),
                None => break,
            }
        };
        spans.push(RowSpan {
            number,
            start,
            content: gt + 1,
            end,
            self_closing,
        });
        next_number = number.saturating_add(1);
        min_pos = end;
    }
    spans
}

fn cell_spans(row_content: &[u8]) -> Vec<CellSpan> {
    let mut spans = Vec::new();
    let mut next_col = 0u32;
    let mut min_pos = 0;
    for start in tag_starts(row_content, b"<c") {
        if start < min_pos {
            continue;
        }
        let Some(gt) = find_bytes_from(row_content, b">", start) else {
            break;
        };
        let col = ref_attr(&row_content[start..gt])
            .and_then(|r| split_coord(&r))
            .map(|(c, _)| c)
            .unwrap_or(next_col);
        let end = if row_content[gt - 1] == b'/' {
            gt + 1
        } else {
            match find_bytes_from(row_content, b"</c>", gt) {
                Some(close) => close + "</c>".len(),
                None => break,
            }
        };
        spans.push(CellSpan { col, start, end });
        next_col = col.saturating_add(1);
        min_pos = end;
    }
    spans
}

fn calc_last_row(sheet_xml: &[u8]) -> Result<u32> {
    let mut rdr = Reader::from_reader(sheet_xml);
    rdr.config_mut().trim_text(true);

    let mut last_row = 0u32;
    let mut next_row = 1u32;
    loop {
        match rdr.read_event().context("malformed worksheet xml")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"row" => {
                let r = match e
                    .attributes()
                    .with_checks(false)
                    .flatten()
                    .find(|a| a.key.as_ref() == b"r")
                {
                    Some(a) => {
                        let raw = attr_value(&a.value);
                        parse_row(&raw).with_context(|| format!("invalid row number `{raw}`"))?
                    }
                    None if next_row <= MAX_ROW => next_row,
                    None => bail!("more than {MAX_ROW} rows"),
                };
                last_row = last_row.max(r);
                next_row = r + 1;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(last_row)
}

/// Largest numeric value of `attr` on `tag` elements, with `prefix` stripped.
fn max_attr_number(xml: &[u8], tag: &[u8], attr: &[u8], prefix: &str) -> Result<u32> {
    let mut rdr = Reader::from_reader(xml);
    rdr.config_mut().trim_text(true);
    let mut max = 0u32;
    loop {
        match rdr.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == tag => {
                if let Some(v) = e
                    .attributes()
                    .with_checks(false)
                    .flatten()
                    .find(|a| a.key.as_ref() == attr)
                {
                    let v = attr_value(&v.value);
                    if let Some(n) = v.strip_prefix(prefix).and_then(|s| s.parse::<u32>().ok()) {
                        max = max.max(n);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(max)
}
