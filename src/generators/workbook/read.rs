use std::io::{Cursor, Read, Seek};

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{
    attr_value, local_name, row_number, Cell, CellCursor, CellXml, Row, Sheet, Workbook,
    WorkbookError, MAX_PART_BYTES,
};

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

#[derive(Debug, Clone)]
pub(crate) struct Relationship {
    pub(crate) id: String,
    pub(crate) kind: String,
    pub(crate) target: String,
}

/// Decode an `.xlsx` package into a [`Workbook`].
///
/// Fails with a [`WorkbookError`] when the bytes are not a zip container, when the
/// workbook part is missing, or when any worksheet or shared string part is malformed.
pub fn decode(bytes: Vec<u8>) -> Result<Workbook, WorkbookError> {
    let (sheets, shared_strings) = {
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))?;

        let workbook_part = read_part(&mut archive, "_rels/.rels")?
            .map(|xml| parse_relationships(&xml))
            .transpose()?
            .and_then(|rels| {
                rels.into_iter()
                    .find(|rel| rel.kind.ends_with("/officeDocument"))
                    .map(|rel| resolve_target("", &rel.target))
            })
            .unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string());

        let workbook_xml = read_part(&mut archive, &workbook_part)?
            .ok_or_else(|| WorkbookError::MissingPart(workbook_part.clone()))?;

        let relationships = match read_part(&mut archive, &rels_part_for(&workbook_part))? {
            Some(xml) => parse_relationships(&xml)?,
            None => Vec::new(),
        };

        let shared_strings = match relationships
            .iter()
            .find(|rel| rel.kind.ends_with("/sharedStrings"))
        {
            Some(rel) => {
                let part = resolve_target(&workbook_part, &rel.target);
                match read_part(&mut archive, &part)? {
                    Some(xml) => parse_shared_strings(&xml)?,
                    None => Vec::new(),
                }
            }
            None => Vec::new(),
        };

        let mut sheets = Vec::new();
        for (name, rel_id) in parse_sheet_entries(&workbook_xml)? {
            // Chartsheets and dialog sheets carry no cells.
            let Some(rel) = relationships
                .iter()
                .find(|rel| rel.id == rel_id && rel.kind.ends_with("/worksheet"))
            else {
                continue;
            };
            let part_name = resolve_target(&workbook_part, &rel.target);
            let xml = read_part(&mut archive, &part_name)?
                .ok_or_else(|| WorkbookError::MissingPart(part_name.clone()))?;
            let rows = parse_rows(&xml, &shared_strings)?;
            sheets.push(Sheet {
                name,
                part_name,
                rows,
            });
        }

        (sheets, shared_strings)
    };

    Ok(Workbook {
        sheets,
        source: bytes,
        shared_strings,
    })
}

/// Read a package part as UTF-8 text, `None` when the part does not exist.
pub(crate) fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, WorkbookError> {
    match read_part_bytes(archive, name)? {
        Some(bytes) => Ok(Some(std::str::from_utf8(&bytes)?.to_string())),
        None => Ok(None),
    }
}

pub(crate) fn read_part_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, WorkbookError> {
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut bytes = Vec::new();
    file.take(MAX_PART_BYTES + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > MAX_PART_BYTES {
        return Err(WorkbookError::PartTooLarge(name.to_string(), MAX_PART_BYTES));
    }
    Ok(Some(bytes))
}

/// `xl/workbook.xml` -> `xl/_rels/workbook.xml.rels`
fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against the part that owns the relationship.
pub(crate) fn resolve_target(owner_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize(absolute.split('/').collect());
    }
    let mut segments: Vec<&str> = owner_part
        .rsplit_once('/')
        .map(|(dir, _)| dir.split('/').collect())
        .unwrap_or_default();
    segments.extend(target.split('/'));
    normalize(segments)
}

fn normalize(segments: Vec<&str>) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in segments {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

pub(crate) fn parse_relationships(xml: &str) -> Result<Vec<Relationship>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e)
                if local_name(e.name().as_ref()) == b"Relationship" =>
            {
                let id = attr_value(&e, b"Id")?.unwrap_or_default();
                let kind = attr_value(&e, b"Type")?.unwrap_or_default();
                let target = attr_value(&e, b"Target")?.unwrap_or_default();
                rels.push(Relationship { id, kind, target });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// `(sheet name, relationship id)` pairs in declaration order.
fn parse_sheet_entries(xml: &str) -> Result<Vec<(String, String)>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"sheet" => {
                let name = attr_value(&e, b"name")?
                    .ok_or_else(|| WorkbookError::Malformed("sheet without a name".to_string()))?;
                let rel_id = attr_value(&e, b"id")?.ok_or_else(|| {
                    WorkbookError::Malformed(format!("sheet `{name}` has no relationship id"))
                })?;
                entries.push((name, rel_id));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(entries)
}

/// Visible text of every `<si>` entry. Rich-text runs are concatenated; phonetic guides
/// (`<rPh>`) are not part of the displayed string and are skipped.
pub(crate) fn parse_shared_strings(xml: &str) -> Result<Vec<String>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = local_name(e.name().as_ref()).to_vec();
                if name == b"si" {
                    current = Some(String::new());
                    stack.clear();
                } else if current.is_some() {
                    stack.push(name);
                }
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"si" => {
                items.push(String::new());
            }
            Event::End(e) => {
                if local_name(e.name().as_ref()) == b"si" {
                    let text = current.take().ok_or_else(|| {
                        WorkbookError::Malformed("unbalanced <si> in shared strings".to_string())
                    })?;
                    items.push(text);
                } else {
                    stack.pop();
                }
            }
            Event::Text(t) => {
                if let Some(text) = current.as_mut() {
                    if is_visible_text(&stack) {
                        text.push_str(&t.unescape()?);
                    }
                }
            }
            Event::CData(c) => {
                if let Some(text) = current.as_mut() {
                    if is_visible_text(&stack) {
                        text.push_str(std::str::from_utf8(&c)?);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(items)
}

fn is_visible_text(stack: &[Vec<u8>]) -> bool {
    match stack {
        [t] => t.as_slice() == b"t",
        [r, t] => r.as_slice() == b"r" && t.as_slice() == b"t",
        _ => false,
    }
}

fn parse_rows(xml: &str, shared_strings: &[String]) -> Result<Vec<Row>, WorkbookError> {
    let mut reader = Reader::from_str(xml);
    let mut rows = Vec::new();
    let mut current: Option<(Row, CellCursor)> = None;
    let mut last_row = 0u32;

    loop {
        match reader.read_event()? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"row" => {
                let number = row_number(&e, last_row)?;
                last_row = number;
                current = Some((
                    Row {
                        number,
                        cells: Vec::new(),
                    },
                    CellCursor::new(number),
                ));
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"row" => {
                let number = row_number(&e, last_row)?;
                last_row = number;
                rows.push(Row {
                    number,
                    cells: Vec::new(),
                });
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"row" => {
                if let Some((row, _)) = current.take() {
                    rows.push(row);
                }
            }
            Event::Start(e) if local_name(e.name().as_ref()) == b"c" => {
                let Some((row, cursor)) = current.as_mut() else {
                    continue;
                };
                let xml = CellXml::read(&mut reader, e.into_owned())?;
                row.cells.push(to_cell(&xml, cursor, shared_strings)?);
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"c" => {
                let Some((row, cursor)) = current.as_mut() else {
                    continue;
                };
                let xml = CellXml::empty(e.into_owned());
                row.cells.push(to_cell(&xml, cursor, shared_strings)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rows)
}

fn to_cell(
    xml: &CellXml,
    cursor: &mut CellCursor,
    shared_strings: &[String],
) -> Result<Cell, WorkbookError> {
    Ok(Cell {
        reference: cursor.advance(xml.reference()?),
        style: xml.style()?,
        value: xml.value(shared_strings)?,
    })
}
