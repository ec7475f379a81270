//! Workbook codec.
//!
//! Decodes an OOXML spreadsheet package (`.xlsx`) into an ordered sheet/row/cell model and
//! encodes a mutated model back into the same container. Encoding patches the original
//! package instead of regenerating it: parts the model does not describe are copied
//! verbatim, and inside worksheets only the `<c>` elements whose value or style changed
//! are rewritten.

mod read;
mod write;

pub use read::decode;
pub use write::encode;

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Maximum uncompressed size accepted for a single package part.
pub(crate) const MAX_PART_BYTES: u64 = 128 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("not a readable workbook container: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] AttrError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("workbook part `{0}` is missing")]
    MissingPart(String),
    #[error("workbook part `{0}` exceeds {1} bytes")]
    PartTooLarge(String, u64),
    #[error("malformed workbook: {0}")]
    Malformed(String),
    #[error("workbook processing was cancelled")]
    Cancelled,
}

/// Typed cell content.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Blank,
    Text(String),
    Number(f64),
    Bool(bool),
    /// ISO 8601 date stored with `t="d"`.
    Date(String),
    Error(String),
    Formula {
        formula: String,
        cached: Option<String>,
    },
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// A1-style reference, e.g. `B7`.
    pub reference: String,
    /// Index into the workbook's cell format table (`s` attribute).
    pub style: Option<u32>,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based row number.
    pub number: u32,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    /// Package part holding the worksheet XML, e.g. `xl/worksheets/sheet1.xml`.
    pub part_name: String,
    pub rows: Vec<Row>,
}

impl Sheet {
    pub fn cell(&self, reference: &str) -> Option<&Cell> {
        self.rows
            .iter()
            .flat_map(|row| row.cells.iter())
            .find(|cell| cell.reference == reference)
    }
}

/// In-memory workbook. Owns the source package so that encoding can carry every part the
/// model does not describe (styles, themes, drawings, defined names...) through unchanged.
#[derive(Debug, Clone)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
    source: Vec<u8>,
    shared_strings: Vec<String>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.sheets
            .iter()
            .flat_map(|sheet| sheet.rows.iter())
            .flat_map(|row| row.cells.iter())
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.sheets
            .iter_mut()
            .flat_map(|sheet| sheet.rows.iter_mut())
            .flat_map(|row| row.cells.iter_mut())
    }
}

pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

pub(crate) fn attr_value(
    start: &BytesStart<'_>,
    key: &[u8],
) -> Result<Option<String>, WorkbookError> {
    for attr in start.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Column letters for a zero-based column index (`0` -> `A`, `27` -> `AB`).
pub(crate) fn column_name(mut index: u32) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Zero-based column index of an A1-style reference.
pub(crate) fn column_index(reference: &str) -> Option<u32> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index: u32 = 0;
    for b in letters {
        index = index
            .checked_mul(26)?
            .checked_add(u32::from(b.to_ascii_uppercase() - b'A') + 1)?;
    }
    Some(index - 1)
}

/// Assigns references to cells of one row, deriving them for producers that omit `r`.
#[derive(Debug)]
pub(crate) struct CellCursor {
    row: u32,
    next_col: u32,
}

impl CellCursor {
    pub(crate) fn new(row: u32) -> Self {
        Self { row, next_col: 0 }
    }

    pub(crate) fn advance(&mut self, explicit: Option<String>) -> String {
        match explicit {
            Some(reference) => {
                if let Some(col) = column_index(&reference) {
                    self.next_col = col + 1;
                }
                reference
            }
            None => {
                let reference = format!("{}{}", column_name(self.next_col), self.row);
                self.next_col += 1;
                reference
            }
        }
    }
}

/// Row number from a `<row>` start tag, falling back to the previous row plus one.
pub(crate) fn row_number(start: &BytesStart<'_>, previous: u32) -> Result<u32, WorkbookError> {
    Ok(attr_value(start, b"r")?
        .and_then(|r| r.trim().parse::<u32>().ok())
        .unwrap_or(previous + 1))
}

/// A `<c>` element captured verbatim, so it can be written back untouched.
#[derive(Debug)]
pub(crate) struct CellXml {
    pub(crate) start: BytesStart<'static>,
    pub(crate) children: Vec<Event<'static>>,
    pub(crate) end: Option<BytesEnd<'static>>,
}

impl CellXml {
    pub(crate) fn empty(start: BytesStart<'static>) -> Self {
        Self {
            start,
            children: Vec::new(),
            end: None,
        }
    }

    /// Consume events up to and including the `</c>` matching `start`.
    pub(crate) fn read(
        reader: &mut Reader<&[u8]>,
        start: BytesStart<'static>,
    ) -> Result<Self, WorkbookError> {
        let mut children = Vec::new();
        let mut depth = 0usize;
        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    depth += 1;
                    children.push(Event::Start(e.into_owned()));
                }
                Event::End(e) if depth == 0 => {
                    return Ok(Self {
                        start,
                        children,
                        end: Some(e.into_owned()),
                    });
                }
                Event::End(e) => {
                    depth -= 1;
                    children.push(Event::End(e.into_owned()));
                }
                Event::Eof => {
                    return Err(WorkbookError::Malformed(
                        "unexpected end of worksheet inside a cell".to_string(),
                    ))
                }
                other => children.push(other.into_owned()),
            }
        }
    }

    pub(crate) fn reference(&self) -> Result<Option<String>, WorkbookError> {
        attr_value(&self.start, b"r")
    }

    pub(crate) fn style(&self) -> Result<Option<u32>, WorkbookError> {
        Ok(attr_value(&self.start, b"s")?.and_then(|s| s.trim().parse::<u32>().ok()))
    }

    /// Interpret the captured element as a typed value.
    pub(crate) fn value(&self, shared_strings: &[String]) -> Result<CellValue, WorkbookError> {
        let kind = attr_value(&self.start, b"t")?;

        let mut stack: Vec<Vec<u8>> = Vec::new();
        let mut v_text = String::new();
        let mut f_text = String::new();
        let mut inline_text = String::new();
        let mut has_formula = false;
        let mut has_value = false;

        for event in &self.children {
            match event {
                Event::Start(e) => {
                    let name = local_name(e.name().as_ref()).to_vec();
                    if stack.is_empty() && name == b"f" {
                        has_formula = true;
                    }
                    if stack.is_empty() && name == b"v" {
                        has_value = true;
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    if stack.is_empty() && local_name(e.name().as_ref()) == b"f" {
                        has_formula = true;
                    }
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    append_text(&stack, &text, &mut v_text, &mut f_text, &mut inline_text);
                }
                Event::CData(c) => {
                    let text = std::str::from_utf8(c)?;
                    append_text(&stack, text, &mut v_text, &mut f_text, &mut inline_text);
                }
                _ => {}
            }
        }

        if has_formula {
            return Ok(CellValue::Formula {
                formula: f_text,
                cached: has_value.then_some(v_text),
            });
        }

        let value = match kind.as_deref() {
            Some("s") => {
                let index: usize = v_text.trim().parse().map_err(|_| {
                    WorkbookError::Malformed(format!("invalid shared string index `{v_text}`"))
                })?;
                let text = shared_strings.get(index).ok_or_else(|| {
                    WorkbookError::Malformed(format!("shared string index {index} out of range"))
                })?;
                CellValue::Text(text.clone())
            }
            Some("inlineStr") => CellValue::Text(inline_text),
            Some("str") => CellValue::Text(v_text),
            Some("b") => CellValue::Bool(v_text.trim() == "1"),
            Some("e") => CellValue::Error(v_text),
            Some("d") => CellValue::Date(v_text),
            _ if !has_value || v_text.trim().is_empty() => CellValue::Blank,
            _ => {
                let number = v_text.trim().parse::<f64>().map_err(|_| {
                    WorkbookError::Malformed(format!("invalid numeric cell value `{v_text}`"))
                })?;
                CellValue::Number(number)
            }
        };
        Ok(value)
    }
}

fn append_text(
    stack: &[Vec<u8>],
    text: &str,
    v_text: &mut String,
    f_text: &mut String,
    inline_text: &mut String,
) {
    match stack {
        [v] if v.as_slice() == b"v" => v_text.push_str(text),
        [f] if f.as_slice() == b"f" => f_text.push_str(text),
        [is, t] if is.as_slice() == b"is" && t.as_slice() == b"t" => inline_text.push_str(text),
        [is, r, t] if is.as_slice() == b"is" && r.as_slice() == b"r" && t.as_slice() == b"t" => {
            inline_text.push_str(text)
        }
        _ => {}
    }
}
