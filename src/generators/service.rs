//! Document generation service.
//!
//! Ties the template store, record store, workbook codec, substitution, invoice
//! composer, render pool and output manager together. Handlers call into this and
//! nothing else.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use super::engine::RenderPool;
use super::invoice::InvoiceComposer;
use super::output::{ArtifactKind, OutputManager};
use super::substitution::{substitute, DataRecord, SubstitutionReport};
use super::{workbook, GeneratedArtifact, GeneratorError};
use crate::db::records::RecordStore;
use crate::invoice::models::Invoice;
use crate::report::models::{FillReportRequest, Report};
use crate::storage::TemplateStore;
use crate::template::models::{Template, TemplateKind};

/// A filled workbook together with its record and substitution statistics.
#[derive(Debug, Clone)]
pub struct FilledReport {
    pub report: Report,
    pub artifact: GeneratedArtifact,
    pub substitution: SubstitutionReport,
}

pub struct DocumentService {
    templates: Arc<dyn TemplateStore>,
    records: Arc<dyn RecordStore>,
    output: OutputManager,
    renderer: Arc<RenderPool>,
    composer: InvoiceComposer,
}

impl DocumentService {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        records: Arc<dyn RecordStore>,
        output: OutputManager,
        renderer: Arc<RenderPool>,
        composer: InvoiceComposer,
    ) -> Self {
        Self {
            templates,
            records,
            output,
            renderer,
            composer,
        }
    }

    pub fn output(&self) -> &OutputManager {
        &self.output
    }

    pub fn renderer(&self) -> &RenderPool {
        &self.renderer
    }

    /// Fill a workbook template with `data` and write the result to the reports
    /// directory, named after `hint`.
    pub async fn fill_workbook(
        &self,
        template_id: Uuid,
        data: &DataRecord,
        hint: &str,
        cancel: &CancellationToken,
    ) -> Result<(GeneratedArtifact, SubstitutionReport), GeneratorError> {
        let template = self.templates.get_template_metadata(template_id).await?;
        ensure_workbook(&template)?;
        let bytes = self.templates.get_template_bytes(template_id).await?;

        let job_cancel = cancel.clone();
        let job_data = data.clone();
        let (filled, stats) = tokio::task::spawn_blocking(move || {
            let mut workbook = workbook::decode(bytes)?;
            let stats = substitute(&mut workbook, &job_data);
            let filled = workbook::encode(&workbook, &job_cancel)?;
            Ok::<_, GeneratorError>((filled, stats))
        })
        .await
        .map_err(|e| GeneratorError::Storage(io::Error::other(e)))??;

        log::info!(
            "Template {}: examined {} cells, changed {}, replaced {} tokens",
            template_id,
            stats.cells_examined,
            stats.cells_changed,
            stats.tokens_replaced
        );
        if !stats.unresolved.is_empty() {
            log::debug!(
                "Template {}: unresolved placeholders {:?}",
                template_id,
                stats.unresolved
            );
        }

        if cancel.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }

        let output_path = self
            .output
            .write_async(filled, ArtifactKind::Report, hint.to_string(), "xlsx".to_string())
            .await?;

        Ok((
            GeneratedArtifact {
                output_path,
                source_id: template_id,
                created_at: Utc::now(),
            },
            stats,
        ))
    }

    /// Fill a report and record it.
    pub async fn fill_report(
        &self,
        request: FillReportRequest,
        cancel: &CancellationToken,
    ) -> Result<FilledReport, GeneratorError> {
        request.validate().map_err(GeneratorError::InvalidRequest)?;
        log::info!(
            "Filling report '{}' from template {}",
            request.name,
            request.template_id
        );

        let (artifact, substitution) = match self
            .fill_workbook(request.template_id, &request.data, &request.name, cancel)
            .await
        {
            Ok(filled) => filled,
            Err(e) => {
                log::error!("Report fill from template {} failed: {}", request.template_id, e);
                return Err(e);
            }
        };

        let report = Report {
            id: Uuid::new_v4(),
            template_id: request.template_id,
            name: request.name,
            generated_path: artifact.output_path.to_string_lossy().into_owned(),
            meta: Value::Object(request.data),
            created_at: artifact.created_at,
        };

        let report = match self.records.create_report(report).await {
            Ok(report) => report,
            Err(e) => {
                self.discard(&artifact.output_path);
                return Err(e);
            }
        };

        log::info!("Report {} written to {}", report.id, report.generated_path);
        Ok(FilledReport {
            report,
            artifact,
            substitution,
        })
    }

    /// Render an invoice to PDF and record the path on the invoice. A PDF rendered
    /// earlier for the same invoice is removed once the new path is recorded.
    pub async fn generate_invoice_pdf(
        &self,
        invoice_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(Invoice, GeneratedArtifact), GeneratorError> {
        let invoice = self.records.get_invoice(invoice_id).await?;
        let employee = self.records.get_employee(invoice.employee_id).await?;
        log::info!("Generating PDF for invoice {}", invoice.invoice_number);

        let markup = self.composer.compose(&invoice, &employee);
        let pdf = match self.renderer.render(&markup, cancel).await {
            Ok(pdf) => pdf,
            Err(e) => {
                log::error!("Rendering invoice {} failed: {}", invoice.invoice_number, e);
                return Err(e);
            }
        };

        let output_path = self
            .output
            .write_async(
                pdf,
                ArtifactKind::Invoice,
                invoice.invoice_number.clone(),
                "pdf".to_string(),
            )
            .await?;

        let previous = invoice.pdf_path.clone();
        let invoice = match self
            .records
            .set_invoice_pdf_path(invoice_id, output_path.to_string_lossy().into_owned())
            .await
        {
            Ok(invoice) => invoice,
            Err(e) => {
                self.discard(&output_path);
                return Err(e);
            }
        };

        if let Some(previous) = previous.as_deref().map(Path::new) {
            if previous != output_path.as_path() && self.output.owns(previous) {
                self.discard(previous);
            }
        }

        log::info!(
            "Invoice {} rendered to {}",
            invoice.invoice_number,
            output_path.display()
        );
        Ok((
            invoice,
            GeneratedArtifact {
                output_path,
                source_id: invoice_id,
                created_at: Utc::now(),
            },
        ))
    }

    /// Delete a report record and its file.
    pub async fn delete_report(&self, id: Uuid) -> Result<Report, GeneratorError> {
        let report = self.records.delete_report(id).await?;
        self.discard(Path::new(&report.generated_path));
        log::info!("Report {} deleted", id);
        Ok(report)
    }

    /// Delete a template, its file, and every report generated from it.
    pub async fn delete_template(&self, id: Uuid) -> Result<Template, GeneratorError> {
        self.templates.get_template_metadata(id).await?;
        let reports = self.records.reports_for_template(id).await?;

        let template = self.templates.delete_template(id).await?;

        for report in reports {
            match self.delete_report(report.id).await {
                Ok(_) | Err(GeneratorError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(template)
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = self.output.remove(path) {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

fn ensure_workbook(template: &Template) -> Result<(), GeneratorError> {
    if template.kind != TemplateKind::Workbook {
        return Err(GeneratorError::UnsupportedTemplate(format!(
            "template {} is not a workbook",
            template.id
        )));
    }
    Ok(())
}

/// Cancellation scope for one request.
///
/// The token fires when the returned guard is dropped, which happens when the request
/// future is dropped on client disconnect, or once `deadline` elapses.
pub fn request_scope(deadline: Duration) -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                log::warn!("Generation deadline of {:?} reached", deadline);
                timer.cancel();
            }
            _ = timer.cancelled() => {}
        }
    });
    let guard = token.clone().drop_guard();
    (token, guard)
}
