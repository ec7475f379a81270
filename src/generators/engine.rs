//! Headless browser rendering engine.
//!
//! Handles writing markup to a scratch directory, driving a headless Chromium
//! print-to-PDF run, and bounding how many of those runs exist at once.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use tempfile::tempdir;
use tokio::process::Command;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use super::GeneratorError;

/// Typical resident footprint of one headless browser process.
const RENDER_PROCESS_FOOTPRINT: u64 = 512 * 1024 * 1024;
const FALLBACK_CONCURRENCY: usize = 2;

/// Converts markup into PDF bytes.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(
        &self,
        markup: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, GeneratorError>;
}

/// Launches one headless Chromium process per document.
#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    binary: PathBuf,
    timeout: Duration,
}

impl ChromiumRenderer {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command(&self, source: &Path, output: &Path, profile: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--user-data-dir={}", profile.display()))
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(format!("file://{}", source.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl RenderBackend for ChromiumRenderer {
    async fn render(
        &self,
        markup: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, GeneratorError> {
        let workdir = tempdir().map_err(|e| {
            GeneratorError::RenderUnavailable(format!("failed to create work directory: {e}"))
        })?;
        let source = workdir.path().join("document.html");
        let output = workdir.path().join("document.pdf");
        let profile = workdir.path().join("profile");

        tokio::fs::write(&source, markup).await.map_err(|e| {
            GeneratorError::RenderUnavailable(format!("failed to stage markup: {e}"))
        })?;

        let mut child = self
            .command(&source, &output, &profile)
            .spawn()
            .map_err(|e| {
                GeneratorError::RenderUnavailable(format!(
                    "failed to launch {}: {e}",
                    self.binary.display()
                ))
            })?;
        log::debug!("Renderer process started (pid {:?})", child.id());

        let outcome = tokio::select! {
            waited = tokio::time::timeout(self.timeout, child.wait()) => match waited {
                Ok(status) => Outcome::Exited(status),
                Err(_) => Outcome::TimedOut,
            },
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        let status = match outcome {
            Outcome::Exited(status) => status.map_err(|e| {
                GeneratorError::RenderUnavailable(format!("failed to wait for renderer: {e}"))
            })?,
            Outcome::TimedOut => {
                log::warn!("Renderer exceeded {:?}, killing it", self.timeout);
                let _ = child.kill().await;
                return Err(GeneratorError::RenderTimeout(self.timeout));
            }
            Outcome::Cancelled => {
                log::info!("Render cancelled, killing renderer process");
                let _ = child.kill().await;
                return Err(GeneratorError::Cancelled);
            }
        };

        if !status.success() {
            return Err(GeneratorError::RenderUnavailable(format!(
                "renderer exited with {status}"
            )));
        }

        let pdf = tokio::fs::read(&output).await.map_err(|e| {
            GeneratorError::RenderUnavailable(format!("renderer produced no output: {e}"))
        })?;
        if !pdf.starts_with(b"%PDF") {
            return Err(GeneratorError::RenderUnavailable(
                "renderer output is not a PDF".to_string(),
            ));
        }
        log::debug!("Renderer finished with {} bytes", pdf.len());
        Ok(pdf)
    }
}

/// Gauges and counters describing the render pool.
#[derive(Clone)]
pub struct RenderMetrics {
    pub in_flight: IntGauge,
    pub queued: IntGauge,
    pub outcomes: IntCounterVec,
}

impl RenderMetrics {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            in_flight: IntGauge::new("render_in_flight", "Render processes currently running")?,
            queued: IntGauge::new("render_queued", "Render requests waiting for a slot")?,
            outcomes: IntCounterVec::new(
                Opts::new("render_requests_total", "Render requests by outcome"),
                &["outcome"],
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.in_flight.clone()))?;
        registry.register(Box::new(self.queued.clone()))?;
        registry.register(Box::new(self.outcomes.clone()))?;
        Ok(())
    }

    fn record(&self, result: &Result<Vec<u8>, GeneratorError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(GeneratorError::RenderBusy) => "busy",
            Err(GeneratorError::RenderTimeout(_)) => "timeout",
            Err(GeneratorError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        self.outcomes.with_label_values(&[outcome]).inc();
    }
}

/// Bounded front for a [`RenderBackend`].
///
/// At most `max_concurrent` renders run at once and at most `max_queue` callers wait for
/// a slot; any caller beyond that gets [`GeneratorError::RenderBusy`] immediately.
pub struct RenderPool {
    backend: Arc<dyn RenderBackend>,
    permits: Arc<Semaphore>,
    max_queue: usize,
    queued: AtomicUsize,
    metrics: Option<RenderMetrics>,
}

struct QueueSlot<'a> {
    queued: &'a AtomicUsize,
    gauge: Option<&'a IntGauge>,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
        if let Some(gauge) = self.gauge {
            gauge.dec();
        }
    }
}

struct InFlight<'a>(Option<&'a IntGauge>);

impl<'a> InFlight<'a> {
    fn enter(gauge: Option<&'a IntGauge>) -> Self {
        if let Some(gauge) = gauge {
            gauge.inc();
        }
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(gauge) = self.0 {
            gauge.dec();
        }
    }
}

impl RenderPool {
    pub fn new(backend: Arc<dyn RenderBackend>, max_concurrent: usize, max_queue: usize) -> Self {
        let metrics = match RenderMetrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                log::warn!("Render metrics disabled: {}", e);
                None
            }
        };
        Self {
            backend,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_queue,
            queued: AtomicUsize::new(0),
            metrics,
        }
    }

    pub fn metrics(&self) -> Option<&RenderMetrics> {
        self.metrics.as_ref()
    }

    /// Number of renders that could start right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub async fn render(
        &self,
        markup: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, GeneratorError> {
        let result = self.render_bounded(markup, cancel).await;
        if let Some(metrics) = &self.metrics {
            metrics.record(&result);
        }
        result
    }

    async fn render_bounded(
        &self,
        markup: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, GeneratorError> {
        let _permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                let _slot = self.enter_queue()?;
                log::debug!("Render queued ({} waiting)", self.queued());
                tokio::select! {
                    permit = self.permits.clone().acquire_owned() => permit.map_err(|_| {
                        GeneratorError::RenderUnavailable("render pool closed".to_string())
                    })?,
                    _ = cancel.cancelled() => return Err(GeneratorError::Cancelled),
                }
            }
            Err(TryAcquireError::Closed) => {
                return Err(GeneratorError::RenderUnavailable(
                    "render pool closed".to_string(),
                ))
            }
        };

        if cancel.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }

        let _in_flight = InFlight::enter(self.metrics.as_ref().map(|m| &m.in_flight));
        self.backend.render(markup, cancel).await
    }

    fn enter_queue(&self) -> Result<QueueSlot<'_>, GeneratorError> {
        let mut current = self.queued.load(Ordering::Acquire);
        loop {
            if current >= self.max_queue {
                return Err(GeneratorError::RenderBusy);
            }
            match self.queued.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let gauge = self.metrics.as_ref().map(|metrics| &metrics.queued);
        if let Some(gauge) = gauge {
            gauge.inc();
        }
        Ok(QueueSlot {
            queued: &self.queued,
            gauge,
        })
    }
}

/// Concurrency bound derived from available memory and CPU count.
pub fn default_render_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_CONCURRENCY);

    match available_memory() {
        Some(bytes) => ((bytes / RENDER_PROCESS_FOOTPRINT) as usize).clamp(1, cpus),
        None => FALLBACK_CONCURRENCY.min(cpus),
    }
}

fn available_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
        .map(|kib| kib * 1024)
}
