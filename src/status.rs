//! Download status shared between the background fetch and its readers.
//!
//! The status lives in one [`StatusCell`] backed by a `tokio::sync::watch`
//! channel: the writer swaps whole snapshots and readers either query
//! [`StatusCell::status`] or subscribe for changes. Transitions are checked
//! inside `send_if_modified`, so concurrent writers cannot move a completed
//! download back to any other state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// State of the archive download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadStatus {
    NotStarted,
    InProgress {
        started_at: DateTime<Utc>,
    },
    /// `finished_at` is `None` when the archive was already on disk.
    Complete {
        finished_at: Option<DateTime<Utc>>,
    },
    Failed {
        error: String,
        finished_at: DateTime<Utc>,
    },
}

impl DownloadStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, DownloadStatus::Complete { .. })
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, DownloadStatus::InProgress { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            DownloadStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Short label used in logs and the CLI.
    pub fn label(&self) -> &'static str {
        match self {
            DownloadStatus::NotStarted => "not started",
            DownloadStatus::InProgress { .. } => "in progress",
            DownloadStatus::Complete { .. } => "complete",
            DownloadStatus::Failed { .. } => "failed",
        }
    }
}

/// Owned, cloneable handle to the download status.
#[derive(Debug, Clone)]
pub struct StatusCell {
    tx: Arc<watch::Sender<DownloadStatus>>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DownloadStatus::NotStarted);
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot.
    pub fn status(&self) -> DownloadStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadStatus> {
        self.tx.subscribe()
    }

    /// `NotStarted → InProgress`. Returns `true` for exactly one caller.
    pub fn try_begin(&self) -> bool {
        self.tx.send_if_modified(|status| {
            if matches!(status, DownloadStatus::NotStarted) {
                *status = DownloadStatus::InProgress {
                    started_at: Utc::now(),
                };
                true
            } else {
                false
            }
        })
    }

    /// Mark the archive as present. Ignored after a failure; a failed
    /// download must be reset explicitly before it can complete.
    pub fn complete(&self, finished_at: Option<DateTime<Utc>>) -> bool {
        self.tx.send_if_modified(|status| match status {
            DownloadStatus::NotStarted | DownloadStatus::InProgress { .. } => {
                *status = DownloadStatus::Complete { finished_at };
                true
            }
            _ => false,
        })
    }

    /// Record a failure. Never overrides a completed download.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        self.tx.send_if_modified(|status| match status {
            DownloadStatus::NotStarted | DownloadStatus::InProgress { .. } => {
                *status = DownloadStatus::Failed {
                    error,
                    finished_at: Utc::now(),
                };
                true
            }
            _ => false,
        })
    }

    /// Manual retry: `Failed → NotStarted`.
    pub fn reset_failed(&self) -> bool {
        self.tx.send_if_modified(|status| {
            if matches!(status, DownloadStatus::Failed { .. }) {
                *status = DownloadStatus::NotStarted;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_succeeds_once() {
        let cell = StatusCell::new();
        assert!(cell.try_begin());
        assert!(!cell.try_begin());
        assert!(cell.status().is_in_progress());
    }

    #[test]
    fn complete_never_reverts() {
        let cell = StatusCell::new();
        cell.try_begin();
        assert!(cell.complete(Some(Utc::now())));
        assert!(!cell.fail("late error"));
        assert!(!cell.try_begin());
        assert!(!cell.reset_failed());
        assert!(cell.status().is_complete());
        assert_eq!(cell.status().error(), None);
    }

    #[test]
    fn failure_is_terminal_until_reset() {
        let cell = StatusCell::new();
        cell.try_begin();
        assert!(cell.fail("network down"));
        assert_eq!(cell.status().error(), Some("network down"));
        assert!(!cell.complete(None));
        assert!(!cell.try_begin());

        assert!(cell.reset_failed());
        assert_eq!(cell.status(), DownloadStatus::NotStarted);
        assert!(cell.try_begin());
    }

    #[test]
    fn subscribers_observe_transitions() {
        let cell = StatusCell::new();
        let mut rx = cell.subscribe();
        cell.try_begin();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_in_progress());
        cell.complete(None);
        assert!(rx.borrow_and_update().is_complete());
    }

    #[test]
    fn serializes_with_state_tag() {
        let json = serde_json::to_value(DownloadStatus::NotStarted).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "not_started" }));
        let json = serde_json::to_value(DownloadStatus::Complete { finished_at: None }).unwrap();
        assert_eq!(json["state"], "complete");
    }
}
