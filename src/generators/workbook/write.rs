use std::collections::HashMap;
use std::io::{Cursor, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::read::read_part_bytes;
use super::{
    local_name, row_number, Cell, CellCursor, CellValue, CellXml, Sheet, Workbook,
    WorkbookError,
};

/// Encode a workbook back into an `.xlsx` package.
///
/// When no cell differs from the source package the source bytes are returned as is.
/// Otherwise only the affected worksheet parts are re-serialised; every other part is
/// raw-copied from the source archive without recompression. The token is checked
/// between parts so an abandoned request stops early.
pub fn encode(workbook: &Workbook, cancel: &CancellationToken) -> Result<Vec<u8>, WorkbookError> {
    let mut archive = ZipArchive::new(Cursor::new(workbook.source.as_slice()))?;

    let mut patched: HashMap<&str, Vec<u8>> = HashMap::new();
    for sheet in &workbook.sheets {
        ensure_active(cancel)?;
        let original = read_part_bytes(&mut archive, &sheet.part_name)?
            .ok_or_else(|| WorkbookError::MissingPart(sheet.part_name.clone()))?;
        if let Some(bytes) = patch_sheet(&original, sheet, &workbook.shared_strings)? {
            patched.insert(sheet.part_name.as_str(), bytes);
        }
    }

    if patched.is_empty() {
        return Ok(workbook.source.clone());
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::with_capacity(workbook.source.len())));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for index in 0..archive.len() {
        ensure_active(cancel)?;
        let file = archive.by_index(index)?;
        match patched.get(file.name()) {
            Some(bytes) => {
                let name = file.name().to_string();
                drop(file);
                zip.start_file(name, options)?;
                zip.write_all(bytes)?;
            }
            None => zip.raw_copy_file(file)?,
        }
    }

    Ok(zip.finish()?.into_inner())
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), WorkbookError> {
    if cancel.is_cancelled() {
        return Err(WorkbookError::Cancelled);
    }
    Ok(())
}

/// Rewrite the cells of one worksheet whose model differs from the XML.
/// Returns `None` when nothing changed.
fn patch_sheet(
    original: &[u8],
    sheet: &Sheet,
    shared_strings: &[String],
) -> Result<Option<Vec<u8>>, WorkbookError> {
    let cells: HashMap<&str, &Cell> = sheet
        .rows
        .iter()
        .flat_map(|row| row.cells.iter())
        .map(|cell| (cell.reference.as_str(), cell))
        .collect();

    let xml = std::str::from_utf8(original)?;
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(original.len() + 256));

    let mut cursor: Option<CellCursor> = None;
    let mut last_row = 0u32;
    let mut changed = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"row" => {
                let number = row_number(&e, last_row)?;
                last_row = number;
                cursor = Some(CellCursor::new(number));
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"row" => {
                last_row = row_number(&e, last_row)?;
                writer.write_event(Event::Empty(e))?;
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"row" => {
                cursor = None;
                writer.write_event(Event::End(e))?;
            }
            Event::Start(e) if local_name(e.name().as_ref()) == b"c" => match cursor.as_mut() {
                Some(cursor) => {
                    let cell = CellXml::read(&mut reader, e.into_owned())?;
                    changed |= emit_cell(&mut writer, cell, cursor, &cells, shared_strings)?;
                }
                None => writer.write_event(Event::Start(e))?,
            },
            Event::Empty(e) if local_name(e.name().as_ref()) == b"c" => match cursor.as_mut() {
                Some(cursor) => {
                    let cell = CellXml::empty(e.into_owned());
                    changed |= emit_cell(&mut writer, cell, cursor, &cells, shared_strings)?;
                }
                None => writer.write_event(Event::Empty(e))?,
            },
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    Ok(changed.then(|| writer.into_inner()))
}

fn emit_cell(
    writer: &mut Writer<Vec<u8>>,
    xml: CellXml,
    cursor: &mut CellCursor,
    cells: &HashMap<&str, &Cell>,
    shared_strings: &[String],
) -> Result<bool, WorkbookError> {
    let reference = cursor.advance(xml.reference()?);
    let Some(model) = cells.get(reference.as_str()) else {
        write_verbatim(writer, xml)?;
        return Ok(false);
    };

    if model.value == xml.value(shared_strings)? && model.style == xml.style()? {
        write_verbatim(writer, xml)?;
        return Ok(false);
    }

    write_cell(writer, &xml.start, model)?;
    Ok(true)
}

fn write_verbatim(writer: &mut Writer<Vec<u8>>, xml: CellXml) -> Result<(), WorkbookError> {
    match xml.end {
        None => writer.write_event(Event::Empty(xml.start))?,
        Some(end) => {
            writer.write_event(Event::Start(xml.start))?;
            for event in xml.children {
                writer.write_event(event)?;
            }
            writer.write_event(Event::End(end))?;
        }
    }
    Ok(())
}

/// Serialise `cell` in place of `original`, keeping every attribute except the value type
/// and style, which are taken from the model. Text is written as an inline string so the
/// shared string table stays untouched.
fn write_cell(
    writer: &mut Writer<Vec<u8>>,
    original: &BytesStart<'_>,
    cell: &Cell,
) -> Result<(), WorkbookError> {
    let name = std::str::from_utf8(original.name().as_ref())?.to_string();
    let prefix = name.strip_suffix('c').unwrap_or_default().to_string();
    let tag = |local: &str| format!("{prefix}{local}");

    let mut start = BytesStart::new(name.clone());
    for attr in original.attributes() {
        let attr = attr?;
        if !matches!(local_name(attr.key.as_ref()), b"s" | b"t") {
            start.push_attribute(attr);
        }
    }
    if let Some(style) = cell.style {
        start.push_attribute(("s", style.to_string().as_str()));
    }

    match &cell.value {
        CellValue::Blank => {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        CellValue::Text(text) => {
            start.push_attribute(("t", "inlineStr"));
            writer.write_event(Event::Start(start))?;
            let is_tag = tag("is");
            let t_tag = tag("t");
            let mut t = BytesStart::new(t_tag.as_str());
            t.push_attribute(("xml:space", "preserve"));
            writer.write_event(Event::Start(BytesStart::new(is_tag.as_str())))?;
            writer.write_event(Event::Start(t))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(t_tag.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(is_tag.as_str())))?;
        }
        CellValue::Number(number) => {
            writer.write_event(Event::Start(start))?;
            write_element(writer, &tag("v"), &number.to_string())?;
        }
        CellValue::Bool(flag) => {
            start.push_attribute(("t", "b"));
            writer.write_event(Event::Start(start))?;
            write_element(writer, &tag("v"), if *flag { "1" } else { "0" })?;
        }
        CellValue::Date(date) => {
            start.push_attribute(("t", "d"));
            writer.write_event(Event::Start(start))?;
            write_element(writer, &tag("v"), date)?;
        }
        CellValue::Error(code) => {
            start.push_attribute(("t", "e"));
            writer.write_event(Event::Start(start))?;
            write_element(writer, &tag("v"), code)?;
        }
        CellValue::Formula { formula, cached } => {
            if cached
                .as_deref()
                .is_some_and(|value| value.trim().parse::<f64>().is_err())
            {
                start.push_attribute(("t", "str"));
            }
            writer.write_event(Event::Start(start))?;
            write_element(writer, &tag("f"), formula)?;
            if let Some(value) = cached {
                write_element(writer, &tag("v"), value)?;
            }
        }
    }

    writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
    Ok(())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<(), WorkbookError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
