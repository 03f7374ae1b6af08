use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::task::JoinHandle;

use super::model::{UploadFile, UploadId, UploadItem, UploadStatus};
use super::{TrackerError, UploadTracker, NOT_PROCESSED_BY_SERVER, REJECTED_BY_SERVER};
use crate::core::time::{format_exam_date, today_utc};
use crate::schemas::exam_upload::{BatchUploadRequest, BatchUploadResponse, FilePayload};

/// A batch whose items are registered and whose submission runs in the background.
#[derive(Debug)]
pub struct BatchHandle {
    ids: Vec<UploadId>,
    task: JoinHandle<()>,
}

impl BatchHandle {
    pub fn ids(&self) -> &[UploadId] {
        &self.ids
    }

    /// Waits until the server has answered (or the batch failed) and the items are reconciled.
    pub async fn finished(self) {
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "Upload batch task join failed");
        }
    }
}

impl UploadTracker {
    /// Registers one `uploading` item per file, then encodes and submits the
    /// files as a single request on a background task.
    ///
    /// Read, transport and server failures never surface here: they turn the
    /// batch's items into `failed` and raise one notification.
    pub async fn upload_files(
        &self,
        files: Vec<UploadFile>,
        profile_id: i64,
    ) -> Result<BatchHandle, TrackerError> {
        if files.is_empty() {
            return Err(TrackerError::EmptyBatch);
        }

        let items: Vec<UploadItem> = files.iter().cloned().map(UploadItem::new).collect();
        let ids: Vec<UploadId> = items.iter().map(UploadItem::id).collect();
        self.with_items(|tracked| tracked.extend(items)).await;

        tracing::info!(profile_id, files = ids.len(), "Exam upload batch registered");

        let tracker = self.clone();
        let batch_ids = ids.clone();
        let task = tokio::spawn(async move {
            tracker.submit_batch(batch_ids, files, profile_id).await;
        });

        Ok(BatchHandle { ids, task })
    }

    async fn submit_batch(&self, ids: Vec<UploadId>, files: Vec<UploadFile>, profile_id: i64) {
        let payloads = match self.encode_files(&ids, files).await {
            Ok(payloads) => payloads,
            Err(message) => {
                tracing::error!(profile_id, error = %message, "Failed to read upload batch");
                self.fail_batch(&ids, &message).await;
                return;
            }
        };

        let request = BatchUploadRequest { files: payloads, profile_id };
        match self.inner.api.upload_multiple(&request).await {
            Ok(response) => self.apply_batch_response(&ids, &response).await,
            Err(err) => {
                tracing::error!(profile_id, error = %err, "Exam batch upload failed");
                self.fail_batch(&ids, &err.to_string()).await;
                return;
            }
        }

        self.ensure_polling().await;
    }

    /// Reads every file concurrently; payloads keep the input order.
    async fn encode_files(
        &self,
        ids: &[UploadId],
        files: Vec<UploadFile>,
    ) -> Result<Vec<FilePayload>, String> {
        let exam_date = format_exam_date(today_utc());

        let reads: Vec<(UploadFile, JoinHandle<std::io::Result<String>>)> = files
            .into_iter()
            .map(|file| {
                let reader = file.clone();
                let handle = tokio::spawn(async move {
                    let bytes = reader.read().await?;
                    Ok::<_, std::io::Error>(STANDARD.encode(bytes))
                });
                (file, handle)
            })
            .collect();

        let mut payloads = Vec::with_capacity(reads.len());
        for (id, (file, handle)) in ids.iter().zip(reads) {
            let file_content = match handle.await {
                Ok(Ok(content)) => content,
                Ok(Err(err)) => return Err(format!("could not read {}: {err}", file.name())),
                Err(err) => return Err(format!("could not read {}: {err}", file.name())),
            };

            self.with_items(|tracked| {
                if let Some(item) = tracked.iter_mut().find(|item| item.id() == *id) {
                    item.set_progress(100);
                }
            })
            .await;

            payloads.push(FilePayload {
                name: file.name().to_string(),
                file_type: file.transport_file_type().to_string(),
                file_content,
                laboratory_name: self.inner.config.laboratory_name.clone(),
                exam_date: exam_date.clone(),
            });
        }

        Ok(payloads)
    }

    async fn apply_batch_response(&self, ids: &[UploadId], response: &BatchUploadResponse) {
        let rejected = self
            .with_items(|tracked| {
                let mut rejected = Vec::new();
                for item in tracked.iter_mut().filter(|item| ids.contains(&item.id())) {
                    match response.result_for(item.name()) {
                        Some(result) if result.is_queued() => {
                            if let Some(exam_id) = result.exam_id {
                                item.assign_exam_id(exam_id);
                            }
                            if item.transition(UploadStatus::Queued, None) {
                                metrics::counter!("exam_uploads_total", "status" => "queued")
                                    .increment(1);
                            }
                        }
                        Some(result) => {
                            let reason = result
                                .error
                                .clone()
                                .unwrap_or_else(|| REJECTED_BY_SERVER.to_string());
                            if item.transition(UploadStatus::Failed, Some(reason.clone())) {
                                rejected.push((item.name().to_string(), reason));
                            }
                        }
                        None => {
                            let reason = NOT_PROCESSED_BY_SERVER.to_string();
                            if item.transition(UploadStatus::Failed, Some(reason.clone())) {
                                rejected.push((item.name().to_string(), reason));
                            }
                        }
                    }
                }
                rejected
            })
            .await;

        tracing::info!(
            files = ids.len(),
            rejected = rejected.len(),
            "Exam upload batch accepted by server"
        );
        self.inner.relay.batch_accepted();

        for (name, reason) in rejected {
            tracing::warn!(file = %name, reason = %reason, "Server rejected uploaded file");
            metrics::counter!("exam_uploads_total", "status" => "rejected").increment(1);
            self.inner.relay.processing_failed(&name, Some(&reason));
        }
    }

    async fn fail_batch(&self, ids: &[UploadId], message: &str) {
        let failed = self
            .with_items(|tracked| {
                tracked
                    .iter_mut()
                    .filter(|item| ids.contains(&item.id()))
                    .map(|item| item.transition(UploadStatus::Failed, Some(message.to_string())))
                    .filter(|changed| *changed)
                    .count()
            })
            .await;

        metrics::counter!("exam_uploads_total", "status" => "failed").increment(failed as u64);
        self.inner.relay.batch_failed(message);
    }
}
