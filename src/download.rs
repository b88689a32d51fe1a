//! Background download supervisor.
//!
//! Owns the fetch task and the [`StatusCell`] it reports to. At most one
//! download runs per supervisor; failures are final until [`retry`] is
//! called.
//!
//! [`retry`]: DownloadSupervisor::retry

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::fetch::{ArchiveFetcher, FetchReport};
use crate::status::{DownloadStatus, StatusCell};

/// Outcome of [`DownloadSupervisor::ensure_started`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The archive was already on disk; nothing was downloaded.
    AlreadyPresent,
    /// This call spawned the download task.
    Spawned,
    /// A download is running, finished, or failed earlier.
    Unchanged,
}

pub struct DownloadSupervisor {
    fetcher: Arc<ArchiveFetcher>,
    status: StatusCell,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadSupervisor {
    pub fn new(fetcher: ArchiveFetcher) -> Self {
        Self::with_status(fetcher, StatusCell::new())
    }

    /// Use an existing cell, e.g. one already shared with the tool layer.
    pub fn with_status(fetcher: ArchiveFetcher, status: StatusCell) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            status,
            handle: Mutex::new(None),
        }
    }

    pub fn status_cell(&self) -> &StatusCell {
        &self.status
    }

    pub fn status(&self) -> DownloadStatus {
        self.status.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadStatus> {
        self.status.subscribe()
    }

    pub fn fetcher(&self) -> &ArchiveFetcher {
        &self.fetcher
    }

    /// Mark an existing archive complete, or spawn the download.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_started(&self) -> StartOutcome {
        if self.fetcher.archive_present() {
            if self.status.complete(None) {
                info!(root = %self.fetcher.root().display(), "archive already present");
                return StartOutcome::AlreadyPresent;
            }
            return StartOutcome::Unchanged;
        }
        if !self.status.try_begin() {
            return StartOutcome::Unchanged;
        }
        self.spawn_fetch();
        StartOutcome::Spawned
    }

    /// Download even if the archive exists. Waits for the result.
    pub async fn force_refresh(&self) -> anyhow::Result<FetchReport> {
        self.cancel().await;
        self.status.reset_failed();
        // A cell that already says "complete" stays complete.
        self.status.try_begin();
        let report = self.fetcher.fetch().await;
        match &report {
            Ok(_) => {
                self.status.complete(Some(Utc::now()));
            }
            Err(e) => {
                self.status.fail(e.to_string());
            }
        }
        Ok(report?)
    }

    fn spawn_fetch(&self) {
        let fetcher = Arc::clone(&self.fetcher);
        let status = self.status.clone();
        let task = tokio::spawn(async move {
            match fetcher.fetch().await {
                Ok(report) => {
                    info!(
                        documents = report.documents,
                        bytes = report.bytes,
                        "download complete"
                    );
                    status.complete(Some(Utc::now()));
                }
                Err(e) => {
                    error!(error = %e, "download failed");
                    status.fail(e.to_string());
                }
            }
        });
        *self.slot() = Some(task);
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Manual retry after a failure. Returns `true` if a new task was spawned.
    pub fn retry(&self) -> bool {
        if !self.status.reset_failed() {
            return false;
        }
        self.ensure_started() == StartOutcome::Spawned
    }

    /// Wait for the running download, if any.
    pub async fn join(&self) {
        let task = self.slot().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Abort the running download. An in-progress status becomes failed.
    pub async fn cancel(&self) {
        let task = self.slot().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            if self.status.fail("download cancelled") {
                info!("download cancelled");
            }
        }
    }
}

impl Drop for DownloadSupervisor {
    fn drop(&mut self) {
        if let Some(task) = self.slot().take() {
            task.abort();
        }
    }
}
