mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use payroll_docgen_server::db::records::{InMemoryRecordStore, RecordStore};
use payroll_docgen_server::employee::models::{CreateEmployeeRequest, Employee};
use payroll_docgen_server::generators::workbook::{self, CellValue};
use payroll_docgen_server::generators::{ArtifactKind, GeneratorError, OutputManager, RenderPool};
use payroll_docgen_server::invoice::models::{
    CreateInvoiceRequest, Invoice, InvoiceLineItem, InvoiceStatus,
};
use payroll_docgen_server::report::models::{FillReportRequest, Report};
use payroll_docgen_server::storage::LocalTemplateStore;
use payroll_docgen_server::template::models::{NewTemplate, Template, TemplateKind};
use payroll_docgen_server::AppState;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::{
    data, payroll_workbook, test_config, test_state, BrokenRenderer, FakeRenderer,
    GatedRenderer, FAKE_PDF,
};

async fn upload(state: &AppState, name: &str, kind: TemplateKind, ext: &str, bytes: Vec<u8>) -> Template {
    state
        .templates
        .create_template(
            NewTemplate {
                name: name.to_string(),
                kind,
                placeholders: Vec::new(),
                extension: ext.to_string(),
            },
            bytes,
        )
        .await
        .unwrap()
}

async fn seed_invoice(state: &AppState) -> Invoice {
    let employee = state
        .records
        .create_employee(Employee::from_request(CreateEmployeeRequest {
            nik: "3175001".to_string(),
            name: "Ada Lovelace".to_string(),
            position: "Analyst".to_string(),
            bank_account: Some("BCA 123-456".to_string()),
            salary: 9_500_000,
        }))
        .await
        .unwrap();

    state
        .records
        .create_invoice(Invoice::from_request(CreateInvoiceRequest {
            invoice_number: "INV/2024/001".to_string(),
            employee_id: employee.id,
            amount: 9_500_000,
            items: vec![InvoiceLineItem {
                description: "March salary".to_string(),
                quantity: Some(1),
                unit_price: Some(9_500_000),
            }],
            status: InvoiceStatus::Pending,
        }))
        .await
        .unwrap()
}

fn fill_request(template_id: Uuid, name: &str) -> FillReportRequest {
    FillReportRequest {
        template_id,
        name: name.to_string(),
        data: data(json!({ "name": "Ada Lovelace", "period": "2024-03" })),
    }
}

#[tokio::test]
async fn template_upload_discovers_placeholders() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));

    let template = upload(&state, "Payroll", TemplateKind::Workbook, "xlsx", payroll_workbook()).await;

    assert_eq!(
        template.placeholders,
        vec!["amount", "name", "period", "unknown"]
    );
    assert!(Path::new(&template.file_path).starts_with(state.documents.output().root()));
    assert_eq!(
        state.templates.get_template_bytes(template.id).await.unwrap(),
        payroll_workbook()
    );
}

#[tokio::test]
async fn repeated_fills_write_distinct_files() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));
    let template = upload(&state, "Payroll", TemplateKind::Workbook, "xlsx", payroll_workbook()).await;
    let cancel = CancellationToken::new();

    let first = state
        .documents
        .fill_report(fill_request(template.id, "March payroll"), &cancel)
        .await
        .unwrap();
    let second = state
        .documents
        .fill_report(fill_request(template.id, "March payroll"), &cancel)
        .await
        .unwrap();

    assert_ne!(first.report.generated_path, second.report.generated_path);
    assert_eq!(first.substitution.tokens_replaced, 3);
    assert_eq!(
        first.substitution.unresolved.iter().collect::<Vec<_>>(),
        vec!["amount", "unknown"]
    );

    for filled in [&first, &second] {
        let bytes = std::fs::read(&filled.report.generated_path).unwrap();
        let workbook = workbook::decode(bytes).unwrap();
        assert_eq!(
            workbook.sheet("Payroll").unwrap().cell("A1").unwrap().value,
            CellValue::Text("Ada Lovelace".to_string())
        );
    }

    let reports = state.records.list_reports().await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].meta["period"], "2024-03");
}

#[tokio::test]
async fn fill_rejects_unknown_and_non_workbook_templates() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));
    let cancel = CancellationToken::new();

    let err = state
        .documents
        .fill_report(fill_request(Uuid::new_v4(), "Missing"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::NotFound { .. }));

    let markup = upload(
        &state,
        "Invoice layout",
        TemplateKind::InvoiceMarkup,
        "html",
        b"<html>{{name}}</html>".to_vec(),
    )
    .await;
    let err = state
        .documents
        .fill_report(fill_request(markup.id, "Layout"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::UnsupportedTemplate(_)));

    let legacy = upload(
        &state,
        "Legacy",
        TemplateKind::Workbook,
        "xls",
        b"\xD0\xCF\x11\xE0 legacy".to_vec(),
    )
    .await;
    let err = state
        .documents
        .fill_report(fill_request(legacy.id, "Legacy"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::CorruptTemplate(_)));

    assert!(state.records.list_reports().await.unwrap().is_empty());
}

#[tokio::test]
async fn fill_with_blank_name_is_invalid() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));
    let template = upload(&state, "Payroll", TemplateKind::Workbook, "xlsx", payroll_workbook()).await;

    let err = state
        .documents
        .fill_report(fill_request(template.id, "   "), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::InvalidRequest(_)));
}

#[tokio::test]
async fn cancelled_fill_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));
    let template = upload(&state, "Payroll", TemplateKind::Workbook, "xlsx", payroll_workbook()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = state
        .documents
        .fill_report(fill_request(template.id, "March"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::Cancelled));

    let reports_dir = state
        .documents
        .output()
        .directory(ArtifactKind::Report);
    assert_eq!(std::fs::read_dir(reports_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn deleting_a_template_removes_its_reports() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));
    let template = upload(&state, "Payroll", TemplateKind::Workbook, "xlsx", payroll_workbook()).await;
    let other = upload(&state, "Other", TemplateKind::Workbook, "xlsx", payroll_workbook()).await;
    let cancel = CancellationToken::new();

    let doomed = state
        .documents
        .fill_report(fill_request(template.id, "March"), &cancel)
        .await
        .unwrap();
    let kept = state
        .documents
        .fill_report(fill_request(other.id, "April"), &cancel)
        .await
        .unwrap();

    state.documents.delete_template(template.id).await.unwrap();

    assert!(!Path::new(&template.file_path).exists());
    assert!(!Path::new(&doomed.report.generated_path).exists());
    assert!(Path::new(&kept.report.generated_path).exists());
    assert!(matches!(
        state.templates.get_template_bytes(template.id).await,
        Err(GeneratorError::NotFound { .. })
    ));
    let remaining = state.records.list_reports().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, kept.report.id);

    assert!(matches!(
        state.documents.delete_template(template.id).await,
        Err(GeneratorError::NotFound { .. })
    ));
}

#[tokio::test]
async fn invoice_pdf_is_written_and_recorded() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));
    let invoice = seed_invoice(&state).await;

    let (updated, artifact) = state
        .documents
        .generate_invoice_pdf(invoice.id, &CancellationToken::new())
        .await
        .unwrap();

    let pdf = std::fs::read(&artifact.output_path).unwrap();
    assert!(pdf.starts_with(FAKE_PDF));
    assert_eq!(
        updated.pdf_path.as_deref(),
        Some(artifact.output_path.to_string_lossy().as_ref())
    );
    let file_name = artifact.output_path.file_name().unwrap().to_string_lossy();
    assert!(file_name.starts_with("invoice-inv2024001-"));
    assert!(file_name.ends_with(".pdf"));

    let stored = state.records.get_invoice(invoice.id).await.unwrap();
    assert_eq!(stored.pdf_path, updated.pdf_path);

    let err = state
        .documents
        .generate_invoice_pdf(Uuid::new_v4(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::NotFound { .. }));
}

#[tokio::test]
async fn failed_render_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(BrokenRenderer));
    let invoice = seed_invoice(&state).await;

    let err = state
        .documents
        .generate_invoice_pdf(invoice.id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::RenderUnavailable(_)));

    let invoices_dir = state
        .documents
        .output()
        .directory(ArtifactKind::Invoice);
    assert_eq!(std::fs::read_dir(invoices_dir).unwrap().count(), 0);
    assert!(state
        .records
        .get_invoice(invoice.id)
        .await
        .unwrap()
        .pdf_path
        .is_none());
}

#[tokio::test]
async fn pool_rejects_when_queue_is_full() {
    let backend = Arc::new(GatedRenderer::default());
    let pool = Arc::new(RenderPool::new(backend.clone(), 1, 0));

    let running = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.render("<p>one</p>", &CancellationToken::new()).await })
    };
    backend.started.notified().await;
    assert_eq!(pool.available(), 0);

    let err = pool
        .render("<p>two</p>", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::RenderBusy));

    backend.release.notify_one();
    let pdf = running.await.unwrap().unwrap();
    assert_eq!(pdf, FAKE_PDF);
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn queued_render_can_be_cancelled() {
    let backend = Arc::new(GatedRenderer::default());
    let pool = Arc::new(RenderPool::new(backend.clone(), 1, 1));

    let running = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.render("<p>one</p>", &CancellationToken::new()).await })
    };
    backend.started.notified().await;

    let cancel = CancellationToken::new();
    let waiting = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.render("<p>two</p>", &cancel).await })
    };

    for _ in 0..100 {
        if pool.queued() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pool.queued(), 1);

    cancel.cancel();
    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, GeneratorError::Cancelled));
    assert_eq!(pool.queued(), 0);

    backend.release.notify_one();
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn slow_render_is_cancelled_by_the_caller() {
    let pool = RenderPool::new(
        Arc::new(FakeRenderer {
            delay: Some(Duration::from_secs(30)),
        }),
        1,
        0,
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = pool.render("<p>slow</p>", &cancel).await.unwrap_err();
    assert!(matches!(err, GeneratorError::Cancelled));
    assert_eq!(pool.available(), 1);
}

/// Record store whose invoice PDF path updates always fail.
struct StuckInvoices(InMemoryRecordStore);

#[async_trait]
impl RecordStore for StuckInvoices {
    async fn get_employee(&self, id: Uuid) -> Result<Employee, GeneratorError> {
        self.0.get_employee(id).await
    }
    async fn list_employees(&self) -> Result<Vec<Employee>, GeneratorError> {
        self.0.list_employees().await
    }
    async fn create_employee(&self, employee: Employee) -> Result<Employee, GeneratorError> {
        self.0.create_employee(employee).await
    }
    async fn get_invoice(&self, id: Uuid) -> Result<Invoice, GeneratorError> {
        self.0.get_invoice(id).await
    }
    async fn list_invoices(&self) -> Result<Vec<Invoice>, GeneratorError> {
        self.0.list_invoices().await
    }
    async fn create_invoice(&self, invoice: Invoice) -> Result<Invoice, GeneratorError> {
        self.0.create_invoice(invoice).await
    }
    async fn set_invoice_pdf_path(
        &self,
        _id: Uuid,
        _path: String,
    ) -> Result<Invoice, GeneratorError> {
        Err(GeneratorError::Storage(std::io::Error::other("records are read-only")))
    }
    async fn create_report(&self, report: Report) -> Result<Report, GeneratorError> {
        self.0.create_report(report).await
    }
    async fn get_report(&self, id: Uuid) -> Result<Report, GeneratorError> {
        self.0.get_report(id).await
    }
    async fn list_reports(&self) -> Result<Vec<Report>, GeneratorError> {
        self.0.list_reports().await
    }
    async fn delete_report(&self, id: Uuid) -> Result<Report, GeneratorError> {
        self.0.delete_report(id).await
    }
    async fn reports_for_template(&self, template_id: Uuid) -> Result<Vec<Report>, GeneratorError> {
        self.0.reports_for_template(template_id).await
    }
}

fn invoice_pdfs(state: &AppState) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(state.documents.output().directory(ArtifactKind::Invoice))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[tokio::test]
async fn rerendering_an_invoice_replaces_its_pdf() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));
    let invoice = seed_invoice(&state).await;
    let cancel = CancellationToken::new();

    let (_, first) = state
        .documents
        .generate_invoice_pdf(invoice.id, &cancel)
        .await
        .unwrap();
    let (updated, second) = state
        .documents
        .generate_invoice_pdf(invoice.id, &cancel)
        .await
        .unwrap();

    assert_ne!(first.output_path, second.output_path);
    assert!(!first.output_path.exists());
    assert_eq!(invoice_pdfs(&state), vec![second.output_path.clone()]);
    assert_eq!(
        updated.pdf_path.as_deref(),
        Some(second.output_path.to_string_lossy().as_ref())
    );
}

#[tokio::test]
async fn unrecorded_invoice_pdf_is_discarded() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let output = OutputManager::new(&config.upload_dir).unwrap();
    let templates = Arc::new(LocalTemplateStore::open(output.clone()).unwrap());
    let records = Arc::new(StuckInvoices(InMemoryRecordStore::default()));
    let state = AppState::with_parts(
        config,
        templates,
        records,
        output,
        Arc::new(FakeRenderer::default()),
    );
    let invoice = seed_invoice(&state).await;

    let err = state
        .documents
        .generate_invoice_pdf(invoice.id, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GeneratorError::Storage(_)));
    assert!(invoice_pdfs(&state).is_empty());
}

#[tokio::test]
async fn failed_template_delete_keeps_its_reports() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir, Arc::new(FakeRenderer::default()));
    let template = upload(&state, "Payroll", TemplateKind::Workbook, "xlsx", payroll_workbook()).await;
    let filled = state
        .documents
        .fill_report(fill_request(template.id, "March"), &CancellationToken::new())
        .await
        .unwrap();

    let index = state
        .documents
        .output()
        .directory(ArtifactKind::Template)
        .join("index.json");
    std::fs::remove_file(&index).unwrap();
    std::fs::create_dir(&index).unwrap();

    assert!(state.documents.delete_template(template.id).await.is_err());

    assert!(state.templates.get_template_bytes(template.id).await.is_ok());
    assert!(Path::new(&filled.report.generated_path).exists());
    assert_eq!(
        state.records.get_report(filled.report.id).await.unwrap().id,
        filled.report.id
    );
}
