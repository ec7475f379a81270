//! Application state and record persistence.
//!
//! - `records` - employee, invoice and report records
//! - `persistence` - background worker writing records to the data file

pub mod persistence;
pub mod records;

use std::io;
use std::sync::Arc;

use prometheus::Registry;

use crate::config::AppConfig;
use crate::generators::{
    ChromiumRenderer, DocumentService, InvoiceComposer, OutputManager, RenderBackend, RenderPool,
};
use crate::storage::{LocalTemplateStore, TemplateStore};
use records::{InMemoryRecordStore, RecordStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub templates: Arc<dyn TemplateStore>,
    pub records: Arc<dyn RecordStore>,
    pub documents: Arc<DocumentService>,
    pub metrics: Registry,
}

impl AppState {
    /// Build the state from configuration: local template files, the JSON record file
    /// and a Chromium render backend. Must be called inside a tokio runtime.
    pub fn new(config: AppConfig) -> io::Result<Self> {
        let output = OutputManager::new(&config.upload_dir)?;
        let templates = Arc::new(LocalTemplateStore::open(output.clone())?);
        let records = Arc::new(InMemoryRecordStore::open(config.data_file.clone())?);
        let backend = Arc::new(ChromiumRenderer::new(
            config.render_binary.clone(),
            config.render_timeout,
        ));

        log::info!(
            "Rendering with {} (max {} concurrent, queue {})",
            config.render_binary.display(),
            config.render_max_concurrent,
            config.render_max_queue
        );

        Ok(Self::with_parts(config, templates, records, output, backend))
    }

    pub fn with_parts(
        config: AppConfig,
        templates: Arc<dyn TemplateStore>,
        records: Arc<dyn RecordStore>,
        output: OutputManager,
        backend: Arc<dyn RenderBackend>,
    ) -> Self {
        let renderer = Arc::new(RenderPool::new(
            backend,
            config.render_max_concurrent,
            config.render_max_queue,
        ));

        let metrics = Registry::new();
        if let Some(render_metrics) = renderer.metrics() {
            if let Err(e) = render_metrics.register(&metrics) {
                log::warn!("Failed to register render metrics: {}", e);
            }
        }

        let documents = Arc::new(DocumentService::new(
            templates.clone(),
            records.clone(),
            output,
            renderer,
            InvoiceComposer::new(config.letterhead.clone()),
        ));

        AppState {
            config: Arc::new(config),
            templates,
            records,
            documents,
            metrics,
        }
    }
}
