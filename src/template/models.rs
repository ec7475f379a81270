use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Extensions accepted by the upload endpoint.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["xlsx", "xls", "html"];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
pub enum TemplateKind {
    #[serde(rename = "workbook", alias = "excel")]
    Workbook,
    #[serde(rename = "invoice_markup", alias = "invoice_html")]
    InvoiceMarkup,
}

impl TemplateKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "workbook" | "excel" => Some(Self::Workbook),
            "invoice_markup" | "invoice_html" => Some(Self::InvoiceMarkup),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: Uuid,
    #[schema(example = "Monthly Payroll")]
    pub name: String,
    pub file_path: String,
    #[serde(rename = "type")]
    pub kind: TemplateKind,
    /// Declared or discovered placeholder keys. Informational only.
    #[schema(example = json!(["name", "period"]))]
    pub placeholders: Vec<String>,
    /// Lowercase extension of the uploaded file, without the dot.
    #[schema(example = "xlsx")]
    pub extension: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata for a template about to be stored.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub kind: TemplateKind,
    pub placeholders: Vec<String>,
    pub extension: String,
}

/// Lowercase extension of `filename` if it is on the allow-list.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Trim, drop empties and remove duplicates, keeping first occurrences in order.
pub fn normalize_placeholders<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for key in keys {
        let key = key.as_ref().trim();
        if !key.is_empty() && !out.iter().any(|existing| existing == key) {
            out.push(key.to_string());
        }
    }
    out
}
