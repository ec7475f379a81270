#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use payroll_docgen_server::db::records::InMemoryRecordStore;
use payroll_docgen_server::generators::{GeneratorError, OutputManager, RenderBackend};
use payroll_docgen_server::storage::LocalTemplateStore;
use payroll_docgen_server::{AppConfig, AppState};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

pub const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="1"><border/></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="3"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/><xf numFmtId="3" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/></cellXfs></styleSheet>"#;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Build an `.xlsx` package from raw `<sheetData>` contents.
///
/// `sheets` holds `(name, rows xml)` pairs; `shared` becomes `xl/sharedStrings.xml`.
pub fn build_xlsx(sheets: &[(&str, &str)], shared: &[&str]) -> Vec<u8> {
    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#,
    );
    let mut workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheets>"#
    );
    let mut workbook_rels = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{PKG_REL_NS}">"#
    );

    for (index, (name, _)) in sheets.iter().enumerate() {
        let n = index + 1;
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
        workbook.push_str(&format!(
            r#"<sheet name="{}" sheetId="{n}" r:id="rId{n}"/>"#,
            escape(name)
        ));
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{n}" Type="{REL_NS}/worksheet" Target="worksheets/sheet{n}.xml"/>"#
        ));
    }
    let styles_id = sheets.len() + 1;
    let shared_id = sheets.len() + 2;
    workbook_rels.push_str(&format!(
        r#"<Relationship Id="rId{styles_id}" Type="{REL_NS}/styles" Target="styles.xml"/><Relationship Id="rId{shared_id}" Type="{REL_NS}/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#
    ));
    content_types.push_str("</Types>");
    workbook.push_str("</sheets></workbook>");

    let mut shared_xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><sst xmlns="{MAIN_NS}" count="{0}" uniqueCount="{0}">"#,
        shared.len()
    );
    for item in shared {
        shared_xml.push_str(&format!("<si><t>{}</t></si>", escape(item)));
    }
    shared_xml.push_str("</sst>");

    let root_rels = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{PKG_REL_NS}"><Relationship Id="rId1" Type="{REL_NS}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
    );

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut add = |name: &str, body: &str| {
        zip.start_file(name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    };

    add("[Content_Types].xml", &content_types);
    add("_rels/.rels", &root_rels);
    add("xl/workbook.xml", &workbook);
    add("xl/_rels/workbook.xml.rels", &workbook_rels);
    add("xl/styles.xml", STYLES_XML);
    add("xl/sharedStrings.xml", &shared_xml);
    for (index, (_, rows)) in sheets.iter().enumerate() {
        add(
            &format!("xl/worksheets/sheet{}.xml", index + 1),
            &format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="{MAIN_NS}"><sheetData>{rows}</sheetData></worksheet>"#
            ),
        );
    }

    zip.finish().unwrap().into_inner()
}

/// Two-sheet payroll workbook.
///
/// `Payroll`:
/// - `A1` shared `{{name}}` (bold, style 1)
/// - `B1` number `42` (style 2)
/// - `C1` formula `SUM(B1:B1)` cached `42`
/// - `D1` boolean true
/// - `A2` shared `{{name}} / {{period}}`
/// - `B2` inline `{{unknown}}`
/// - `C2` inline `Total: {{amount}}`
///
/// `Notes`:
/// - `A1` inline `No tokens here`
pub fn payroll_workbook() -> Vec<u8> {
    build_xlsx(
        &[
            (
                "Payroll",
                concat!(
                    r#"<row r="1"><c r="A1" s="1" t="s"><v>0</v></c><c r="B1" s="2"><v>42</v></c>"#,
                    r#"<c r="C1"><f>SUM(B1:B1)</f><v>42</v></c><c r="D1" t="b"><v>1</v></c></row>"#,
                    r#"<row r="2"><c r="A2" t="s"><v>1</v></c>"#,
                    r#"<c r="B2" t="inlineStr"><is><t>{{unknown}}</t></is></c>"#,
                    r#"<c r="C2" s="1" t="inlineStr"><is><t>Total: {{amount}}</t></is></c></row>"#
                ),
            ),
            (
                "Notes",
                r#"<row r="1"><c r="A1" t="inlineStr"><is><t>No tokens here</t></is></c></row>"#,
            ),
        ],
        &["{{name}}", "{{name}} / {{period}}"],
    )
}

/// Read one part of a zip package.
pub fn read_part(package: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(package)).ok()?;
    let mut file = archive.by_name(name).ok()?;
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut file, &mut bytes).ok()?;
    Some(bytes)
}

pub fn data(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub const FAKE_PDF: &[u8] = b"%PDF-1.7\n% fake document\n%%EOF\n";

/// Backend that returns a fixed PDF without launching a browser.
#[derive(Default)]
pub struct FakeRenderer {
    pub delay: Option<Duration>,
}

#[async_trait]
impl RenderBackend for FakeRenderer {
    async fn render(
        &self,
        markup: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, GeneratorError> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(GeneratorError::Cancelled),
            }
        }
        let mut pdf = FAKE_PDF.to_vec();
        pdf.extend_from_slice(format!("% {} bytes of markup\n", markup.len()).as_bytes());
        Ok(pdf)
    }
}

/// Backend that holds every render until released.
#[derive(Default)]
pub struct GatedRenderer {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl RenderBackend for GatedRenderer {
    async fn render(
        &self,
        _markup: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, GeneratorError> {
        self.started.notify_one();
        tokio::select! {
            _ = self.release.notified() => Ok(FAKE_PDF.to_vec()),
            _ = cancel.cancelled() => Err(GeneratorError::Cancelled),
        }
    }
}

/// Backend that always fails as if the browser binary were missing.
pub struct BrokenRenderer;

#[async_trait]
impl RenderBackend for BrokenRenderer {
    async fn render(
        &self,
        _markup: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, GeneratorError> {
        Err(GeneratorError::RenderUnavailable(
            "renderer binary not found".to_string(),
        ))
    }
}

pub fn test_config(dir: &TempDir) -> AppConfig {
    let upload_dir = dir.path().join("uploads").display().to_string();
    AppConfig::from_lookup(move |key| match key {
        "UPLOAD_DIR" => Some(upload_dir.clone()),
        "RENDER_MAX_CONCURRENT" => Some("1".to_string()),
        "RENDER_MAX_QUEUE" => Some("1".to_string()),
        "RENDER_TIMEOUT_SECS" => Some("5".to_string()),
        "GENERATION_DEADLINE_SECS" => Some("30".to_string()),
        _ => None,
    })
    .expect("test configuration is valid")
}

/// Application state over a temporary directory, in-memory records and `backend`.
pub fn test_state(dir: &TempDir, backend: Arc<dyn RenderBackend>) -> AppState {
    let config = test_config(dir);
    let output = OutputManager::new(&config.upload_dir).expect("output directories");
    let templates =
        Arc::new(LocalTemplateStore::open(output.clone()).expect("template store opens"));
    let records = Arc::new(InMemoryRecordStore::default());
    AppState::with_parts(config, templates, records, output, backend)
}
