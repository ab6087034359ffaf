//! Reads the first worksheet of an `.xlsx` workbook into an import [`Sheet`].
//!
//! The workbook is a ZIP of SpreadsheetML parts. The first sheet is found
//! through `xl/workbook.xml` and its relationships, falling back to the
//! lowest-numbered `xl/worksheets/sheetN.xml`. Row 1 is the header row;
//! every later row up to the last non-empty one becomes a record keyed by
//! header, blank rows included so row numbers match the spreadsheet.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::Context;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use scriptorium_core::import::Sheet;

pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum cells to read from the worksheet.
const MAX_CELLS: usize = 500_000;
/// Last row number a SpreadsheetML worksheet can hold.
pub const MAX_ROWS: u32 = 1_048_576;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const WORKSHEET_PREFIX: &str = "xl/worksheets/sheet";

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("not a valid xlsx archive: {0}")]
    Archive(String),

    #[error("malformed {part}: {message}")]
    Xml { part: String, message: String },

    #[error("workbook has no worksheet")]
    NoWorksheet,

    #[error("ZIP entry {0} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)")]
    TooLarge(String),

    #[error("worksheet has more than {MAX_CELLS} cells")]
    TooManyCells,

    #[error("row number {0} is outside 1..={MAX_ROWS}")]
    RowOutOfRange(String),
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn xml_error(part: &str, e: impl std::fmt::Display) -> XlsxError {
    XlsxError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}

/// Reads a ZIP entry, or `None` when the workbook does not contain it.
fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<Vec<u8>>, XlsxError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(XlsxError::Archive(e.to_string())),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| XlsxError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(XlsxError::TooLarge(name.to_string()));
    }
    Ok(Some(out))
}

/// Value of the attribute whose local name is `name` (`r:id` matches `id`).
fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Parses an XML part, handing every start/empty element to `on_element`.
fn scan_elements<F>(part: &str, xml: &[u8], mut on_element: F) -> Result<(), XlsxError>
where
    F: FnMut(&BytesStart<'_>),
{
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => on_element(&e),
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

/// Part name of the first sheet listed in the workbook.
fn first_sheet_from_workbook(archive: &mut Archive<'_>) -> Result<Option<String>, XlsxError> {
    let Some(workbook) = read_entry(archive, WORKBOOK_PART)? else {
        return Ok(None);
    };
    let mut first_rel = None;
    scan_elements(WORKBOOK_PART, &workbook, |e| {
        if first_rel.is_none() && e.local_name().as_ref() == b"sheet" {
            first_rel = attr(e, b"id");
        }
    })?;
    let Some(rel_id) = first_rel else {
        return Ok(None);
    };

    let Some(rels) = read_entry(archive, WORKBOOK_RELS_PART)? else {
        return Ok(None);
    };
    let mut target = None;
    scan_elements(WORKBOOK_RELS_PART, &rels, |e| {
        if target.is_none()
            && e.local_name().as_ref() == b"Relationship"
            && attr(e, b"Id").as_deref() == Some(rel_id.as_str())
        {
            target = attr(e, b"Target").map(|t| resolve_target(&t));
        }
    })?;
    Ok(target)
}

fn first_worksheet_path(archive: &mut Archive<'_>) -> Result<String, XlsxError> {
    if let Some(path) = first_sheet_from_workbook(archive)? {
        if archive.index_for_name(&path).is_some() {
            return Ok(path);
        }
    }
    archive
        .file_names()
        .filter_map(|name| {
            let number = name.strip_prefix(WORKSHEET_PREFIX)?.strip_suffix(".xml")?;
            number.parse::<u32>().ok().map(|n| (n, name.to_string()))
        })
        .min()
        .map(|(_, name)| name)
        .ok_or(XlsxError::NoWorksheet)
}

/// Tracks `<t>` text inside a string item, skipping phonetic runs.
#[derive(Default)]
struct TextCollector {
    in_t: bool,
    phonetic_depth: usize,
    text: String,
}

impl TextCollector {
    fn start(&mut self, name: &[u8]) {
        match name {
            b"rPh" => self.phonetic_depth += 1,
            b"t" if self.phonetic_depth == 0 => self.in_t = true,
            _ => {}
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"rPh" => self.phonetic_depth = self.phonetic_depth.saturating_sub(1),
            b"t" => self.in_t = false,
            _ => {}
        }
    }

    fn take(&mut self) -> String {
        self.in_t = false;
        self.phonetic_depth = 0;
        std::mem::take(&mut self.text)
    }
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, XlsxError> {
    let Some(xml) = read_entry(archive, SHARED_STRINGS_PART)? else {
        return Ok(Vec::new());
    };
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut item: Option<TextCollector> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"si" {
                    item = Some(TextCollector::default());
                } else if let Some(collector) = item.as_mut() {
                    collector.start(name.as_ref());
                }
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) => {
                if let Some(collector) = item.as_mut().filter(|c| c.in_t) {
                    let text = te.unescape().map_err(|e| xml_error(SHARED_STRINGS_PART, e))?;
                    collector.text.push_str(&text);
                }
            }
            Ok(Event::CData(cd)) => {
                if let Some(collector) = item.as_mut().filter(|c| c.in_t) {
                    collector.text.push_str(&String::from_utf8_lossy(&cd.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"si" {
                    if let Some(mut collector) = item.take() {
                        strings.push(collector.take());
                    }
                } else if let Some(collector) = item.as_mut() {
                    collector.end(name.as_ref());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(SHARED_STRINGS_PART, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Splits a cell reference such as `AB12` into a zero-based column and a row number.
fn parse_cell_ref(reference: &str) -> Option<(u32, Option<u32>)> {
    let letters: String = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let column = letters
        .chars()
        .try_fold(0u32, |acc, c| {
            acc.checked_mul(26)?
                .checked_add(u32::from(c.to_ascii_uppercase()) - u32::from('A') + 1)
        })?
        .checked_sub(1)?;
    let row = reference[letters.len()..].parse().ok();
    Some((column, row))
}

/// The cell being read.
#[derive(Default)]
struct CellState {
    column: u32,
    kind: Option<String>,
    in_v: bool,
    value: String,
    inline: Option<TextCollector>,
}

impl CellState {
    fn resolve(self, shared: &[String]) -> String {
        match self.kind.as_deref() {
            Some("s") => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i).cloned())
                .unwrap_or_default(),
            Some("inlineStr") => self.inline.map(|mut t| t.take()).unwrap_or_default(),
            Some("b") => match self.value.trim() {
                "1" => "TRUE".to_string(),
                _ => "FALSE".to_string(),
            },
            _ => self.value,
        }
    }
}

/// Row number of a `<row>` element: its `r` attribute, or the one after
/// `previous` when absent.
fn row_number(e: &BytesStart<'_>, previous: u32) -> Result<u32, XlsxError> {
    let row = match attr(e, b"r") {
        Some(r) => match r.trim().parse::<u32>() {
            Ok(n) => n,
            Err(_) => return Err(XlsxError::RowOutOfRange(r)),
        },
        None => previous.saturating_add(1),
    };
    if row == 0 || row > MAX_ROWS {
        return Err(XlsxError::RowOutOfRange(row.to_string()));
    }
    Ok(row)
}

/// Every non-empty cell as `(row, column, text)`.
fn read_cells(part: &str, xml: &[u8], shared: &[String]) -> Result<Vec<(u32, u32, String)>, XlsxError> {
    let mut cells = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut row = 0u32;
    let mut next_column = 0u32;
    let mut cell: Option<CellState> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = row_number(&e, row)?;
                    next_column = 0;
                }
                b"c" => {
                    let column = attr(&e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .map(|(c, _)| c)
                        .unwrap_or(next_column);
                    next_column = column + 1;
                    cell = Some(CellState {
                        column,
                        kind: attr(&e, b"t"),
                        ..CellState::default()
                    });
                }
                b"v" => {
                    if let Some(c) = cell.as_mut() {
                        c.in_v = true;
                    }
                }
                b"is" => {
                    if let Some(c) = cell.as_mut() {
                        c.inline = Some(TextCollector::default());
                    }
                }
                name => {
                    if let Some(inline) = cell.as_mut().and_then(|c| c.inline.as_mut()) {
                        inline.start(name);
                    }
                }
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => row = row_number(&e, row)?,
                b"c" => next_column += 1,
                _ => {}
            },
            Ok(Event::Text(te)) => {
                if let Some(c) = cell.as_mut() {
                    let target = if c.in_v {
                        Some(&mut c.value)
                    } else {
                        c.inline.as_mut().filter(|t| t.in_t).map(|t| &mut t.text)
                    };
                    if let Some(target) = target {
                        target.push_str(&te.unescape().map_err(|e| xml_error(part, e))?);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => {
                    if let Some(c) = cell.as_mut() {
                        c.in_v = false;
                    }
                }
                b"c" => {
                    if let Some(done) = cell.take() {
                        let column = done.column;
                        let text = done.resolve(shared);
                        if !text.trim().is_empty() {
                            if cells.len() >= MAX_CELLS {
                                return Err(XlsxError::TooManyCells);
                            }
                            cells.push((row, column, text));
                        }
                    }
                }
                name => {
                    if let Some(inline) = cell.as_mut().and_then(|c| c.inline.as_mut()) {
                        inline.end(name);
                    }
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells)
}

/// Lays cells out as a header row plus keyed records.
fn assemble(cells: Vec<(u32, u32, String)>) -> Sheet {
    let header_cells: BTreeMap<u32, String> = cells
        .iter()
        .filter(|(row, _, _)| *row == 1)
        .map(|(_, column, text)| (*column, text.trim().to_string()))
        .filter(|(_, name)| !name.is_empty())
        .collect();

    let last_row = cells.iter().map(|(row, _, _)| *row).max().unwrap_or(0);
    let mut rows: Vec<BTreeMap<String, String>> =
        (2..=last_row.max(1)).map(|_| BTreeMap::new()).collect();
    for (row, column, text) in cells {
        if row < 2 {
            continue;
        }
        if let Some(header) = header_cells.get(&column) {
            rows[(row - 2) as usize].insert(header.clone(), text);
        }
    }

    Sheet {
        headers: header_cells.into_values().collect(),
        rows,
    }
}

/// Parses xlsx bytes into a [`Sheet`].
pub fn read_sheet(bytes: &[u8]) -> Result<Sheet, XlsxError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| XlsxError::Archive(e.to_string()))?;
    let shared = read_shared_strings(&mut archive)?;
    let part = first_worksheet_path(&mut archive)?;
    let xml = read_entry(&mut archive, &part)?.ok_or(XlsxError::NoWorksheet)?;
    let cells = read_cells(&part, &xml, &shared)?;
    Ok(assemble(cells))
}

pub fn read_sheet_file(path: &Path) -> anyhow::Result<Sheet> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read workbook: {}", path.display()))?;
    read_sheet(&bytes).with_context(|| format!("Failed to parse workbook: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn workbook(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const WORKBOOK: &str = r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Data" sheetId="1" r:id="rId7"/><sheet name="Other" sheetId="2" r:id="rId1"/></sheets></workbook>"#;
    const RELS: &str = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId7" Type="worksheet" Target="/xl/worksheets/sheet2.xml"/></Relationships>"#;

    #[test]
    fn reads_the_sheet_named_first_in_the_workbook() {
        let shared = r#"<sst><si><t>judul</t></si><si><r><t>Hikayat </t></r><r><t>Raja</t></r><rPh><t>x</t></rPh></si></sst>"#;
        let data = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1" t="inlineStr"><is><t>jumlahHalaman</t></is></c></row>
            <row r="2"><c r="A2" t="s"><v>1</v></c><c r="C2"><v>120</v></c></row>
            <row r="4"><c r="C4" t="str"><f>1+1</f><v>2</v></c><c r="D4"><v>9</v></c></row>
        </sheetData></worksheet>"#;
        let bytes = workbook(&[
            (WORKBOOK_PART, WORKBOOK),
            (WORKBOOK_RELS_PART, RELS),
            (SHARED_STRINGS_PART, shared),
            ("xl/worksheets/sheet1.xml", "<worksheet><sheetData/></worksheet>"),
            ("xl/worksheets/sheet2.xml", data),
        ]);

        let sheet = read_sheet(&bytes).unwrap();
        assert_eq!(sheet.headers, vec!["judul", "jumlahHalaman"]);
        assert_eq!(sheet.rows.len(), 3);
        assert_eq!(sheet.rows[0]["judul"], "Hikayat Raja");
        assert_eq!(sheet.rows[0]["jumlahHalaman"], "120");
        assert!(sheet.rows[1].is_empty());
        assert_eq!(sheet.rows[2].len(), 1);
        assert_eq!(sheet.rows[2]["jumlahHalaman"], "2");
    }

    #[test]
    fn falls_back_to_lowest_numbered_sheet() {
        let bytes = workbook(&[
            ("xl/worksheets/sheet10.xml", "<worksheet><sheetData/></worksheet>"),
            (
                "xl/worksheets/sheet2.xml",
                r#"<worksheet><sheetData><row><c t="b"><v>1</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        let sheet = read_sheet(&bytes).unwrap();
        assert_eq!(sheet.headers, vec!["TRUE"]);
        assert!(sheet.rows.is_empty());
    }

    #[test]
    fn cell_references() {
        assert_eq!(parse_cell_ref("A1"), Some((0, Some(1))));
        assert_eq!(parse_cell_ref("Z9"), Some((25, Some(9))));
        assert_eq!(parse_cell_ref("AB12"), Some((27, Some(12))));
        assert_eq!(parse_cell_ref("12"), None);
    }

    #[test]
    fn rows_past_the_sheet_limit_are_rejected() {
        for r in ["20000000", "4294967295", "0", "-3"] {
            let sheet = format!(
                r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>judul</t></is></c></row><row r="{r}"><c r="A{r}"><v>1</v></c></row></sheetData></worksheet>"#
            );
            let bytes = workbook(&[("xl/worksheets/sheet1.xml", sheet.as_str())]);
            assert!(
                matches!(read_sheet(&bytes), Err(XlsxError::RowOutOfRange(_))),
                "row {r} accepted"
            );
        }

        let last = format!(
            r#"<worksheet><sheetData><row r="1"><c t="inlineStr"><is><t>judul</t></is></c></row><row r="{MAX_ROWS}"/></sheetData></worksheet>"#
        );
        let bytes = workbook(&[("xl/worksheets/sheet1.xml", last.as_str())]);
        assert!(read_sheet(&bytes).unwrap().rows.is_empty());
    }

    #[test]
    fn garbage_is_an_archive_error() {
        assert!(matches!(read_sheet(b"not a zip"), Err(XlsxError::Archive(_))));
    }

    #[test]
    fn workbook_without_sheets_is_rejected() {
        let bytes = workbook(&[("docProps/app.xml", "<Properties/>")]);
        assert!(matches!(read_sheet(&bytes), Err(XlsxError::NoWorksheet)));
    }
}
