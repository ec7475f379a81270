//! Artifact naming and atomic writes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use uuid::Uuid;

use super::common::sanitize_filename;
use super::GeneratorError;

const MAX_NAME_ATTEMPTS: usize = 4;

/// The three artifact families, each with its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Template,
    Invoice,
    Report,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Template, Self::Invoice, Self::Report];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Invoice => "invoice",
            Self::Report => "report",
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Template => "templates",
            Self::Invoice => "invoices",
            Self::Report => "reports",
        }
    }
}

/// Decides where generated files live and writes them all-or-nothing.
#[derive(Debug, Clone)]
pub struct OutputManager {
    root: PathBuf,
}

impl OutputManager {
    /// Create the root and the per-kind directories if needed.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        for kind in ArtifactKind::ALL {
            fs::create_dir_all(root.join(kind.dir_name()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directory(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// `<kind>-<hint>-<unix millis>-<random>.<ext>`, with the hint sanitised.
    pub fn artifact_name(kind: ArtifactKind, hint: &str, ext: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}-{}.{}",
            kind.prefix(),
            sanitize_filename(hint, kind.prefix()),
            Utc::now().timestamp_millis(),
            &suffix[..8],
            ext.trim_start_matches('.')
        )
    }

    /// Write `bytes` as a new artifact and return its absolute path.
    ///
    /// The data is staged in a temporary file in the target directory and moved into
    /// place without overwriting, so a failure never leaves a partial file behind.
    pub fn write(
        &self,
        bytes: &[u8],
        kind: ArtifactKind,
        hint: &str,
        ext: &str,
    ) -> Result<PathBuf, GeneratorError> {
        let dir = self.directory(kind);
        let mut staged = NamedTempFile::new_in(&dir).map_err(GeneratorError::WriteFailed)?;
        staged
            .write_all(bytes)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(GeneratorError::WriteFailed)?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = dir.join(Self::artifact_name(kind, hint, ext));
            match staged.persist_noclobber(&path) {
                Ok(_) => {
                    log::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
                    return Ok(path);
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => staged = e.file,
                Err(e) => return Err(GeneratorError::WriteFailed(e.error)),
            }
        }

        Err(GeneratorError::WriteFailed(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not find a free artifact name",
        )))
    }

    /// [`write`](Self::write) on the blocking pool.
    pub async fn write_async(
        &self,
        bytes: Vec<u8>,
        kind: ArtifactKind,
        hint: String,
        ext: String,
    ) -> Result<PathBuf, GeneratorError> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.write(&bytes, kind, &hint, &ext))
            .await
            .map_err(|e| GeneratorError::WriteFailed(io::Error::other(e)))?
    }

    /// Whether `path` points inside this manager's root.
    pub fn owns(&self, path: &Path) -> bool {
        path.is_absolute()
            && path.starts_with(&self.root)
            && !path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }

    /// Remove an artifact. Missing files are not an error; paths outside the root are
    /// refused.
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        if !self.owns(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is outside the output root", path.display()),
            ));
        }
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Replace `path` atomically with `bytes`, staging next to it.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}
