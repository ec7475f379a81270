//! Background persistence worker for record data.
//!
//! Receives snapshots over a channel and writes the latest one to the data file,
//! debouncing bursts of updates into a single write.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use super::records::Snapshot;
use crate::generators::output::write_atomic;

const DEBOUNCE_MS: u64 = 500;

/// Runs until every sender is dropped, then flushes what it has and returns.
pub async fn start_persistence_worker(
    mut receiver: mpsc::UnboundedReceiver<Snapshot>,
    data_file: PathBuf,
) {
    log::info!("Record persistence worker started ({})", data_file.display());

    while let Some(snapshot) = receiver.recv().await {
        let mut latest = snapshot;
        while let Ok(newer) = receiver.try_recv() {
            log::debug!("Batching pending record update");
            latest = newer;
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(DEBOUNCE_MS)).await;

        while let Ok(newer) = receiver.try_recv() {
            log::debug!("Batching record update after debounce delay");
            latest = newer;
        }

        persist(&data_file, &latest).await;
    }

    log::info!("Record persistence worker stopped");
}

async fn persist(data_file: &Path, snapshot: &Snapshot) {
    let json = match serde_json::to_vec_pretty(snapshot) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Failed to serialize records for persistence: {}", e);
            return;
        }
    };

    let path = data_file.to_path_buf();
    match tokio::task::spawn_blocking(move || write_atomic(&path, &json)).await {
        Ok(Ok(())) => log::info!(
            "Records persisted ({} employees, {} invoices, {} reports)",
            snapshot.employees.len(),
            snapshot.invoices.len(),
            snapshot.reports.len()
        ),
        Ok(Err(e)) => log::error!("Failed to persist records to {}: {}", data_file.display(), e),
        Err(e) => log::error!("Record persistence task failed: {}", e),
    }
}
