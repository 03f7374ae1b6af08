//! Tracks exam uploads from file selection until the backend finishes
//! analysing them.
//!
//! [`UploadTracker`] owns the upload collection. It is mutated only by
//! [`UploadTracker::upload_files`] (batch submission) and by the status
//! poller it runs while any item is queued or processing. Consumers read
//! snapshots and receive [`TrackerEvent`]s on the channel returned by
//! [`UploadTracker::new`].

mod model;
mod notifications;
mod poller;
mod submitter;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::services::exam_api::ExamApi;

pub use model::{UploadFile, UploadId, UploadItem, UploadStatus};
pub use notifications::{Notification, NotificationVariant, QueryKey, TrackerEvent};
pub use submitter::BatchHandle;

use notifications::NotificationRelay;

pub const DEFAULT_LABORATORY_NAME: &str = "Upload Múltiplo";
pub const NOT_PROCESSED_BY_SERVER: &str = "not processed by server";
pub const REJECTED_BY_SERVER: &str = "rejected by server";
pub const PROCESSING_TIMED_OUT: &str = "processing timed out";

/// Shortest period the status poller runs at. Smaller intervals are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    /// Pollable items older than this are failed. `None` waits forever.
    pub stale_after: Option<Duration>,
    pub laboratory_name: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            stale_after: Some(Duration::from_secs(30 * 60)),
            laboratory_name: DEFAULT_LABORATORY_NAME.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("upload batch must contain at least one file")]
    EmptyBatch,
    #[error("not a file path: {0}")]
    InvalidFile(String),
}

/// Shared handle to the upload collection. Cloning is cheap.
#[derive(Clone)]
pub struct UploadTracker {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn ExamApi>,
    config: TrackerConfig,
    relay: NotificationRelay,
    state: Mutex<TrackerState>,
    shutdown_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct TrackerState {
    items: Vec<UploadItem>,
    poller: Option<JoinHandle<()>>,
}

impl UploadTracker {
    pub fn new(
        api: Arc<dyn ExamApi>,
        mut config: TrackerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        if config.poll_interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                requested_ms = config.poll_interval.as_millis() as u64,
                "Poll interval below minimum, clamping"
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        let (relay, events) = NotificationRelay::channel();
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Inner { api, config, relay, state: Mutex::default(), shutdown_tx };
        (Self { inner: Arc::new(inner) }, events)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Snapshot of every tracked upload in submission order.
    pub async fn uploads(&self) -> Vec<UploadItem> {
        self.inner.state.lock().await.items.clone()
    }

    pub async fn get(&self, id: UploadId) -> Option<UploadItem> {
        self.inner.state.lock().await.items.iter().find(|item| item.id() == id).cloned()
    }

    pub async fn is_uploading(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .items
            .iter()
            .any(|item| item.status() == UploadStatus::Uploading)
    }

    /// Drops analyzed and failed items. Returns how many were removed.
    pub async fn clear_completed(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let before = state.items.len();
        state.items.retain(|item| !item.status().is_terminal());
        let removed = before - state.items.len();
        if removed > 0 {
            tracing::debug!(removed, "Cleared completed uploads");
        }
        removed
    }

    /// Stops the poller and waits for it to exit. Later batches are still
    /// submitted but no longer polled.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);

        let handle = self.inner.state.lock().await.poller.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Upload status poller join failed");
            }
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    async fn with_items<R>(&self, f: impl FnOnce(&mut Vec<UploadItem>) -> R) -> R {
        let mut state = self.inner.state.lock().await;
        f(&mut state.items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{self, FakeExamApi};

    #[tokio::test]
    async fn clear_completed_removes_only_terminal_items() {
        let api = Arc::new(
            FakeExamApi::new()
                .respond_with(&[("a.pdf", "queued", Some(1)), ("b.pdf", "error", None)]),
        );
        let (tracker, _events) = test_support::tracker(api.clone());

        let done = tracker
            .upload_files(test_support::pdfs(&["a.pdf", "b.pdf", "c.pdf"]), 1)
            .await
            .expect("batch");
        done.finished().await;

        let gate = api.hold_profile(1);
        let pending =
            tracker.upload_files(test_support::pdfs(&["d.pdf"]), 1).await.expect("batch");

        let statuses: Vec<_> = tracker
            .uploads()
            .await
            .iter()
            .map(|item| (item.name().to_string(), item.status()))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a.pdf".to_string(), UploadStatus::Queued),
                ("b.pdf".to_string(), UploadStatus::Failed),
                ("c.pdf".to_string(), UploadStatus::Failed),
                ("d.pdf".to_string(), UploadStatus::Uploading),
            ]
        );

        assert_eq!(tracker.clear_completed().await, 2);
        let remaining: Vec<_> =
            tracker.uploads().await.iter().map(|item| item.name().to_string()).collect();
        assert_eq!(remaining, vec!["a.pdf".to_string(), "d.pdf".to_string()]);
        assert_eq!(tracker.clear_completed().await, 0);

        gate.notify_one();
        pending.finished().await;
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn is_uploading_tracks_unsent_items() {
        let api = Arc::new(FakeExamApi::new().respond_with(&[("a.pdf", "queued", Some(1))]));
        let (tracker, _events) = test_support::tracker(api.clone());
        assert!(!tracker.is_uploading().await);

        let gate = api.hold_profile(1);
        let batch = tracker.upload_files(test_support::pdfs(&["a.pdf"]), 1).await.expect("batch");
        assert!(tracker.is_uploading().await);

        gate.notify_one();
        batch.finished().await;
        assert!(!tracker.is_uploading().await);
        tracker.shutdown().await;
    }

    #[test]
    fn default_config_polls_every_three_seconds() {
        let config = TrackerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.laboratory_name, DEFAULT_LABORATORY_NAME);
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let api = Arc::new(FakeExamApi::new());
        let config = TrackerConfig { poll_interval: Duration::ZERO, ..test_support::config() };
        let (tracker, _events) = UploadTracker::new(api, config);
        assert_eq!(tracker.config().poll_interval, MIN_POLL_INTERVAL);
    }
}
