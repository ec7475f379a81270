//! Template storage.
//!
//! Template files live in the `templates/` output directory; their metadata is kept in
//! memory and mirrored to `templates/index.json` after every change.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::generators::output::{write_atomic, ArtifactKind, OutputManager};
use crate::generators::substitution::scan_placeholders;
use crate::generators::workbook;
use crate::generators::GeneratorError;
use crate::template::models::{normalize_placeholders, NewTemplate, Template, TemplateKind};

const INDEX_FILE: &str = "index.json";

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn create_template(
        &self,
        template: NewTemplate,
        bytes: Vec<u8>,
    ) -> Result<Template, GeneratorError>;

    /// All templates, newest first.
    async fn list_templates(&self) -> Result<Vec<Template>, GeneratorError>;

    async fn get_template_metadata(&self, id: Uuid) -> Result<Template, GeneratorError>;

    async fn get_template_bytes(&self, id: Uuid) -> Result<Vec<u8>, GeneratorError>;

    /// Remove metadata and backing file, returning the removed metadata.
    async fn delete_template(&self, id: Uuid) -> Result<Template, GeneratorError>;
}

pub struct LocalTemplateStore {
    output: OutputManager,
    index_path: PathBuf,
    templates: RwLock<Vec<Template>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl LocalTemplateStore {
    /// Open the store, loading an existing index if one is present.
    pub fn open(output: OutputManager) -> io::Result<Self> {
        let index_path = output.directory(ArtifactKind::Template).join(INDEX_FILE);
        let templates = load_index(&index_path)?;
        log::info!("Loaded {} templates from {}", templates.len(), index_path.display());

        Ok(Self {
            output,
            index_path,
            templates: RwLock::new(templates),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn persist_index(&self) -> Result<(), GeneratorError> {
        let _guard = self.persist_lock.lock().await;
        let json = serde_json::to_vec_pretty(&*self.templates.read())
            .map_err(|e| GeneratorError::Storage(io::Error::other(e)))?;
        let path = self.index_path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| GeneratorError::Storage(io::Error::other(e)))?
            .map_err(GeneratorError::Storage)
    }

    fn find(&self, id: Uuid) -> Result<Template, GeneratorError> {
        self.templates
            .read()
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| GeneratorError::not_found("template", id))
    }
}

fn load_index(path: &Path) -> io::Result<Vec<Template>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Token keys found in an `.xlsx` workbook, in sorted order.
pub fn discover_placeholders(bytes: Vec<u8>) -> Result<Vec<String>, GeneratorError> {
    let workbook = workbook::decode(bytes)?;
    Ok(scan_placeholders(&workbook).into_iter().collect())
}

#[async_trait]
impl TemplateStore for LocalTemplateStore {
    async fn create_template(
        &self,
        template: NewTemplate,
        bytes: Vec<u8>,
    ) -> Result<Template, GeneratorError> {
        let mut placeholders = normalize_placeholders(&template.placeholders);
        if placeholders.is_empty()
            && template.kind == TemplateKind::Workbook
            && template.extension == "xlsx"
        {
            let copy = bytes.clone();
            match tokio::task::spawn_blocking(move || discover_placeholders(copy)).await {
                Ok(Ok(found)) => placeholders = found,
                Ok(Err(e)) => log::warn!("Could not scan '{}' for placeholders: {}", template.name, e),
                Err(e) => log::warn!("Placeholder scan task failed: {}", e),
            }
        }

        let path = self
            .output
            .write_async(
                bytes,
                ArtifactKind::Template,
                template.name.clone(),
                template.extension.clone(),
            )
            .await?;

        let stored = Template {
            id: Uuid::new_v4(),
            name: template.name,
            file_path: path.to_string_lossy().into_owned(),
            kind: template.kind,
            placeholders,
            extension: template.extension,
            created_at: Utc::now(),
        };

        self.templates.write().push(stored.clone());
        if let Err(e) = self.persist_index().await {
            self.templates.write().retain(|t| t.id != stored.id);
            let _ = self.output.remove(&path);
            return Err(e);
        }

        log::info!("Template {} stored at {}", stored.id, stored.file_path);
        Ok(stored)
    }

    async fn list_templates(&self) -> Result<Vec<Template>, GeneratorError> {
        let mut templates = self.templates.read().clone();
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(templates)
    }

    async fn get_template_metadata(&self, id: Uuid) -> Result<Template, GeneratorError> {
        self.find(id)
    }

    async fn get_template_bytes(&self, id: Uuid) -> Result<Vec<u8>, GeneratorError> {
        let template = self.find(id)?;
        match tokio::fs::read(&template.file_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(GeneratorError::not_found("template file", id))
            }
            Err(e) => Err(GeneratorError::Storage(e)),
        }
    }

    async fn delete_template(&self, id: Uuid) -> Result<Template, GeneratorError> {
        let (position, removed) = {
            let mut templates = self.templates.write();
            let position = templates
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| GeneratorError::not_found("template", id))?;
            (position, templates.remove(position))
        };

        if let Err(e) = self.persist_index().await {
            let mut templates = self.templates.write();
            let position = position.min(templates.len());
            templates.insert(position, removed);
            return Err(e);
        }

        if let Err(e) = self.output.remove(Path::new(&removed.file_path)) {
            log::warn!("Failed to delete template file {}: {}", removed.file_path, e);
        }
        log::info!("Template {} deleted", id);
        Ok(removed)
    }
}
