use actix_multipart::{Field, Multipart};
use actix_web::HttpResponse;
use futures::StreamExt;
use sanitize_filename::sanitize;

use crate::template::models::{allowed_extension, NewTemplate, TemplateKind, ALLOWED_EXTENSIONS};
use crate::ErrorResponse;

/// Largest template file accepted.
pub const MAX_TEMPLATE_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug)]
pub struct ParsedTemplateUpload {
    pub template: NewTemplate,
    pub file_data: Vec<u8>,
    pub original_filename: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Multipart field error: {0}")]
    FieldError(String),
    #[error("No file data found in multipart payload")]
    MissingFile,
    #[error("Unsupported file type `{0}`; allowed: {allowed}", allowed = ALLOWED_EXTENSIONS.join(", "))]
    UnsupportedExtension(String),
    #[error("Unknown template type `{0}`")]
    UnknownKind(String),
    #[error("Invalid placeholders: {0}")]
    InvalidPlaceholders(String),
    #[error("File exceeds {0} bytes")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Invalid UTF-8 data: {0}")]
    Utf8Error(String),
}

impl From<UploadError> for HttpResponse {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::IoError(_) => HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error(&error.to_string())),
            UploadError::TooLarge(_) => HttpResponse::PayloadTooLarge()
                .json(ErrorResponse::new("PayloadTooLarge", &error.to_string())),
            _ => HttpResponse::BadRequest().json(ErrorResponse::bad_request(&error.to_string())),
        }
    }
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, UploadError> {
    let mut buffer = Vec::new();
    while let Some(chunk) = field.next().await {
        let data = chunk.map_err(|e| UploadError::IoError(e.to_string()))?;
        if buffer.len() + data.len() > limit {
            return Err(UploadError::TooLarge(limit));
        }
        buffer.extend_from_slice(&data);
    }
    Ok(buffer)
}

async fn read_text(field: &mut Field) -> Result<String, UploadError> {
    let bytes = read_field(field, 64 * 1024).await?;
    String::from_utf8(bytes).map_err(|e| UploadError::Utf8Error(e.to_string()))
}

/// Accepts a JSON array of strings or a comma separated list.
pub fn parse_placeholders(value: &str) -> Result<Vec<String>, UploadError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Vec::new());
    }
    if value.starts_with('[') {
        return serde_json::from_str(value)
            .map_err(|e| UploadError::InvalidPlaceholders(e.to_string()));
    }
    Ok(value.split(',').map(|s| s.trim().to_string()).collect())
}

pub struct MultipartParser;

impl MultipartParser {
    /// Parse a template upload: `file` (required), `name`, `type` and `placeholders`.
    pub async fn parse_template_multipart(
        mut multipart: Multipart,
    ) -> Result<ParsedTemplateUpload, UploadError> {
        let mut file: Option<(Vec<u8>, String)> = None;
        let mut name: Option<String> = None;
        let mut kind: Option<TemplateKind> = None;
        let mut placeholders = Vec::new();

        while let Some(item) = multipart.next().await {
            let mut field = item.map_err(|e| UploadError::FieldError(e.to_string()))?;
            let content_disposition = field
                .content_disposition()
                .ok_or_else(|| UploadError::FieldError("Content disposition not found".to_string()))?;
            let field_name = content_disposition
                .get_name()
                .ok_or_else(|| UploadError::FieldError("Field name not found".to_string()))?
                .to_string();
            let filename = content_disposition.get_filename().map(sanitize);

            match field_name.as_str() {
                "file" => {
                    let filename = filename.ok_or_else(|| {
                        UploadError::FieldError("No filename in file field".to_string())
                    })?;
                    if allowed_extension(&filename).is_none() {
                        return Err(UploadError::UnsupportedExtension(filename));
                    }
                    let data = read_field(&mut field, MAX_TEMPLATE_BYTES).await?;
                    file = Some((data, filename));
                }
                "name" => {
                    let value = read_text(&mut field).await?;
                    if !value.trim().is_empty() {
                        name = Some(value.trim().to_string());
                    }
                }
                "type" => {
                    let value = read_text(&mut field).await?;
                    kind = Some(
                        TemplateKind::parse(&value).ok_or(UploadError::UnknownKind(value))?,
                    );
                }
                "placeholders" => {
                    placeholders = parse_placeholders(&read_text(&mut field).await?)?;
                }
                _ => continue,
            }
        }

        let (file_data, original_filename) = file.ok_or(UploadError::MissingFile)?;
        if file_data.is_empty() {
            return Err(UploadError::MissingFile);
        }
        let extension = allowed_extension(&original_filename)
            .ok_or_else(|| UploadError::UnsupportedExtension(original_filename.clone()))?;

        let kind = kind.unwrap_or(match extension.as_str() {
            "html" => TemplateKind::InvoiceMarkup,
            _ => TemplateKind::Workbook,
        });

        Ok(ParsedTemplateUpload {
            template: NewTemplate {
                name: name.unwrap_or_else(|| original_filename.clone()),
                kind,
                placeholders,
                extension,
            },
            file_data,
            original_filename,
        })
    }
}
