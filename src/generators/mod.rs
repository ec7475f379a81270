//! Generators module - template-driven document generation.
//!
//! This module contains the pipeline that turns a stored template plus a data record
//! into an output document:
//! - `workbook` - `.xlsx` decode/encode with round-trip preservation
//! - `substitution` - `{{key}}` placeholder replacement
//! - `invoice` - invoice markup composer
//! - `engine` - headless browser rendering behind a bounded pool
//! - `output` - artifact naming and atomic writes
//! - `service` - composition of the above for the HTTP layer

pub mod common;
pub mod engine;
pub mod invoice;
pub mod output;
pub mod service;
pub mod substitution;
pub mod workbook;

pub use engine::{ChromiumRenderer, RenderBackend, RenderPool};
pub use invoice::{InvoiceComposer, Letterhead};
pub use output::{ArtifactKind, OutputManager};
pub use service::{request_scope, DocumentService, FilledReport};
pub use substitution::{DataRecord, SubstitutionReport};

use std::path::PathBuf;
use std::time::Duration;

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ErrorResponse;
use workbook::WorkbookError;

/// Seconds a client is asked to wait after a busy response.
const RETRY_AFTER_SECS: u64 = 5;

/// Errors that can occur during document generation.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("template could not be read: {0}")]
    CorruptTemplate(#[source] WorkbookError),
    #[error("unsupported template: {0}")]
    UnsupportedTemplate(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rendering backend unavailable: {0}")]
    RenderUnavailable(String),
    #[error("rendering exceeded {0:?}")]
    RenderTimeout(Duration),
    #[error("rendering busy, retry later")]
    RenderBusy,
    #[error("generation cancelled")]
    Cancelled,
    #[error("failed to write output: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("storage failure: {0}")]
    Storage(#[source] std::io::Error),
}

impl GeneratorError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::CorruptTemplate(_) => "CorruptTemplate",
            Self::UnsupportedTemplate(_) => "UnsupportedTemplate",
            Self::InvalidRequest(_) => "BadRequest",
            Self::RenderUnavailable(_) => "RenderUnavailable",
            Self::RenderTimeout(_) => "RenderTimeout",
            Self::RenderBusy => "RenderBusy",
            Self::Cancelled => "Cancelled",
            Self::WriteFailed(_) => "WriteFailed",
            Self::Storage(_) => "InternalServerError",
        }
    }
}

impl From<WorkbookError> for GeneratorError {
    fn from(error: WorkbookError) -> Self {
        match error {
            WorkbookError::Cancelled => Self::Cancelled,
            other => Self::CorruptTemplate(other),
        }
    }
}

impl ResponseError for GeneratorError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::CorruptTemplate(_) | Self::UnsupportedTemplate(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::RenderBusy => StatusCode::SERVICE_UNAVAILABLE,
            Self::RenderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::RenderUnavailable(_) | Self::WriteFailed(_) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if matches!(self, Self::RenderBusy) {
            response.insert_header((header::RETRY_AFTER, RETRY_AFTER_SECS.to_string()));
        }
        response.json(ErrorResponse::new(self.kind(), &self.to_string()))
    }
}

/// Result of a successful document generation.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArtifact {
    #[schema(value_type = String)]
    pub output_path: PathBuf,
    /// Template or invoice the artifact was generated from.
    pub source_id: Uuid,
    pub created_at: DateTime<Utc>,
}
