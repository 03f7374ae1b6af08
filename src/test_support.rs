use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify, OwnedMutexGuard};

use crate::schemas::exam_upload::{
    BatchUploadRequest, BatchUploadResponse, BatchUploadResult, ExamStatusResponse,
};
use crate::services::exam_api::{ExamApi, ExamApiError};
use crate::tracker::{TrackerConfig, TrackerEvent, UploadFile, UploadTracker};

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

/// Poll interval long enough that only explicit `poll_once` calls hit the fake.
pub(crate) fn config() -> TrackerConfig {
    TrackerConfig {
        poll_interval: Duration::from_secs(3600),
        stale_after: None,
        ..TrackerConfig::default()
    }
}

pub(crate) fn tracker(
    api: Arc<FakeExamApi>,
) -> (UploadTracker, mpsc::UnboundedReceiver<TrackerEvent>) {
    UploadTracker::new(api, config())
}

pub(crate) fn pdfs(names: &[&str]) -> Vec<UploadFile> {
    names
        .iter()
        .map(|name| {
            let content_type = if name.ends_with(".png") { "image/png" } else { "application/pdf" };
            UploadFile::from_bytes(*name, content_type, format!("%PDF {name}").into_bytes())
        })
        .collect()
}

pub(crate) fn drain(events: &mut mpsc::UnboundedReceiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub(crate) fn notification_titles(
    events: &mut mpsc::UnboundedReceiver<TrackerEvent>,
) -> Vec<String> {
    drain(events)
        .into_iter()
        .filter_map(|event| match event {
            TrackerEvent::Notify(notification) => Some(notification.title),
            TrackerEvent::Invalidate(_) => None,
        })
        .collect()
}

/// In-memory exam backend with scripted answers.
#[derive(Default)]
pub(crate) struct FakeExamApi {
    submit_outcome: Option<Result<BatchUploadResponse, ExamApiError>>,
    statuses: StdMutex<HashMap<i64, VecDeque<Result<String, ExamApiError>>>>,
    processing_errors: StdMutex<HashMap<i64, String>>,
    holds: StdMutex<HashMap<i64, Arc<Notify>>>,
    last_request: StdMutex<Option<BatchUploadRequest>>,
    submit_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FakeExamApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond_with(mut self, results: &[(&str, &str, Option<i64>)]) -> Self {
        let results = results
            .iter()
            .map(|(name, status, exam_id)| BatchUploadResult {
                name: name.to_string(),
                status: status.to_string(),
                exam_id: *exam_id,
                error: None,
            })
            .collect();
        self.submit_outcome = Some(Ok(BatchUploadResponse { results }));
        self
    }

    pub(crate) fn respond_with_error_result(mut self, name: &str, error: &str) -> Self {
        self.submit_outcome = Some(Ok(BatchUploadResponse {
            results: vec![BatchUploadResult {
                name: name.to_string(),
                status: "error".to_string(),
                exam_id: None,
                error: Some(error.to_string()),
            }],
        }));
        self
    }

    pub(crate) fn fail_with(mut self, err: ExamApiError) -> Self {
        self.submit_outcome = Some(Err(err));
        self
    }

    /// Successive polls of `exam_id` walk `statuses`; the last one repeats.
    pub(crate) fn script(self, exam_id: i64, statuses: &[&str]) -> Self {
        self.statuses
            .lock()
            .expect("statuses lock")
            .insert(exam_id, statuses.iter().map(|status| Ok(status.to_string())).collect());
        self
    }

    pub(crate) fn script_error(self, exam_id: i64, err: ExamApiError) -> Self {
        self.statuses.lock().expect("statuses lock").insert(exam_id, VecDeque::from([Err(err)]));
        self
    }

    pub(crate) fn set_processing_error(&self, exam_id: i64, message: &str) {
        self.processing_errors.lock().expect("errors lock").insert(exam_id, message.to_string());
    }

    /// Submissions for `profile_id` wait until the returned gate is notified.
    pub(crate) fn hold_profile(&self, profile_id: i64) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.holds.lock().expect("holds lock").insert(profile_id, gate.clone());
        gate
    }

    pub(crate) fn last_request(&self) -> Option<BatchUploadRequest> {
        self.last_request.lock().expect("request lock").clone()
    }

    pub(crate) fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExamApi for FakeExamApi {
    async fn upload_multiple(
        &self,
        request: &BatchUploadRequest,
    ) -> Result<BatchUploadResponse, ExamApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().expect("request lock") = Some(request.clone());

        let gate = self.holds.lock().expect("holds lock").get(&request.profile_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.submit_outcome.clone().unwrap_or_else(|| Ok(BatchUploadResponse::default()))
    }

    async fn exam_status(&self, exam_id: i64) -> Result<ExamStatusResponse, ExamApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let next = {
            let mut statuses = self.statuses.lock().expect("statuses lock");
            match statuses.get_mut(&exam_id) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match next {
            Some(Ok(status)) => Ok(ExamStatusResponse {
                status,
                processing_error: self
                    .processing_errors
                    .lock()
                    .expect("errors lock")
                    .get(&exam_id)
                    .cloned(),
            }),
            Some(Err(err)) => Err(err),
            None => Err(ExamApiError::Rejected {
                status: 404,
                message: format!("exam {exam_id} not found"),
            }),
        }
    }
}
