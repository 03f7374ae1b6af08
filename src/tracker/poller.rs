use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::model::{UploadId, UploadItem, UploadStatus};
use super::{Inner, UploadTracker, PROCESSING_TIMED_OUT};

/// One status change discovered during a tick.
#[derive(Debug)]
struct StatusUpdate {
    id: UploadId,
    status: UploadStatus,
    error: Option<String>,
}

#[derive(Debug)]
struct PollTarget {
    id: UploadId,
    name: String,
    exam_id: Option<i64>,
    stale: bool,
}

impl UploadTracker {
    /// Whether the background status poller is currently scheduled.
    pub async fn is_polling(&self) -> bool {
        self.inner.state.lock().await.poller.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Runs a single reconciliation pass: one status request per queued or
    /// processing item with a known exam id. All changes are applied in one
    /// write. Returns the number of items whose status changed.
    pub async fn poll_once(&self) -> usize {
        let stale_after = self.inner.config.stale_after;
        let targets: Vec<PollTarget> = self
            .with_items(|tracked| {
                tracked
                    .iter()
                    .filter(|item| item.status().is_pollable())
                    .map(|item| PollTarget {
                        id: item.id(),
                        name: item.name().to_string(),
                        exam_id: item.exam_id(),
                        stale: stale_after.is_some_and(|limit| item.age() > limit),
                    })
                    .collect()
            })
            .await;

        if targets.is_empty() {
            return 0;
        }

        let mut updates = Vec::new();
        for target in &targets {
            let mut update = None;

            if let Some(exam_id) = target.exam_id {
                match self.inner.api.exam_status(exam_id).await {
                    Ok(response) => {
                        metrics::counter!("exam_status_polls_total", "outcome" => "ok")
                            .increment(1);
                        match UploadStatus::from_server_status(&response.status) {
                            Some(status) => {
                                update = Some(StatusUpdate {
                                    id: target.id,
                                    status,
                                    error: response.processing_error,
                                })
                            }
                            None => tracing::debug!(
                                exam_id,
                                status = %response.status,
                                "Unknown exam status, keeping local state"
                            ),
                        }
                    }
                    Err(err) => {
                        metrics::counter!("exam_status_polls_total", "outcome" => "error")
                            .increment(1);
                        tracing::warn!(
                            upload_id = %target.id,
                            exam_id,
                            error = %err,
                            "Error polling exam status"
                        );
                    }
                }
            }

            let finished = update.as_ref().is_some_and(|update| update.status.is_terminal());
            if target.stale && !finished {
                tracing::warn!(
                    upload_id = %target.id,
                    file = %target.name,
                    "Upload exceeded processing deadline"
                );
                update = Some(StatusUpdate {
                    id: target.id,
                    status: UploadStatus::Failed,
                    error: Some(PROCESSING_TIMED_OUT.to_string()),
                });
            }

            updates.extend(update);
        }

        self.apply_updates(updates).await
    }

    async fn apply_updates(&self, updates: Vec<StatusUpdate>) -> usize {
        if updates.is_empty() {
            return 0;
        }

        let changed: Vec<(String, UploadStatus, Option<String>)> = self
            .with_items(|tracked| {
                updates
                    .into_iter()
                    .filter_map(|update| {
                        let item = tracked.iter_mut().find(|item| item.id() == update.id)?;
                        item.transition(update.status, update.error).then(|| {
                            let error = item.error().map(str::to_string);
                            (item.name().to_string(), item.status(), error)
                        })
                    })
                    .collect()
            })
            .await;

        for (name, status, error) in &changed {
            tracing::info!(file = %name, status = %status, "Upload status changed");
            match status {
                UploadStatus::Analyzed => {
                    metrics::counter!("exam_upload_transitions_total", "status" => "analyzed")
                        .increment(1);
                    self.inner.relay.analysis_completed(name);
                }
                UploadStatus::Failed => {
                    metrics::counter!("exam_upload_transitions_total", "status" => "failed")
                        .increment(1);
                    self.inner.relay.processing_failed(name, error.as_deref());
                }
                _ => {}
            }
        }

        changed.len()
    }

    /// Starts the poller if something is waiting on the server and it is not already running.
    pub(super) async fn ensure_polling(&self) {
        if self.is_shut_down() {
            return;
        }

        let mut state = self.inner.state.lock().await;
        let running = state.poller.as_ref().is_some_and(|handle| !handle.is_finished());
        if running || !state.items.iter().any(|item| self.needs_polling(item)) {
            return;
        }

        tracing::debug!(
            interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            "Starting upload status poller"
        );
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown_tx.subscribe();
        state.poller = Some(tokio::spawn(poll_loop(weak, shutdown)));
    }

    /// Items queued without an exam id can only change through the stale policy.
    fn needs_polling(&self, item: &UploadItem) -> bool {
        item.is_awaiting_server()
            || (item.status().is_pollable() && self.inner.config.stale_after.is_some())
    }

    /// Clears the poller slot when nothing is left to poll. Checked under the
    /// same lock `ensure_polling` takes, so a batch queued concurrently either
    /// sees the poller still running or starts a new one.
    async fn release_poller_if_idle(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.items.iter().any(|item| self.needs_polling(item)) {
            return false;
        }
        state.poller = None;
        true
    }
}

async fn poll_loop(inner: Weak<Inner>, mut shutdown: watch::Receiver<bool>) {
    let Some(period) = inner.upgrade().map(|inner| inner.config.poll_interval) else {
        return;
    };
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let tracker = UploadTracker { inner };
                tracker.poll_once().await;
                if tracker.release_poller_if_idle().await {
                    tracing::debug!("No pending uploads, stopping status poller");
                    break;
                }
            }
        }
    }
}
