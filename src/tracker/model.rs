use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::TrackerError;

/// Client-side identifier of one tracked upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(Uuid);

impl UploadId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    Uploading,
    Queued,
    Processing,
    Analyzed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Analyzed => "analyzed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Analyzed | Self::Failed)
    }

    /// Waiting on server-side processing.
    pub fn is_pollable(self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Uploading => matches!(next, Self::Queued | Self::Failed),
            Self::Queued => matches!(next, Self::Processing | Self::Analyzed | Self::Failed),
            Self::Processing => matches!(next, Self::Analyzed | Self::Failed),
            Self::Analyzed | Self::Failed => false,
        }
    }

    /// Maps the backend's exam status vocabulary onto the local states.
    /// Unknown values map to `None` and leave the item untouched.
    pub fn from_server_status(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "analyzed" | "extraction_only" => Some(Self::Analyzed),
            "failed" => Some(Self::Failed),
            "processing" | "analyzing" | "extracted" => Some(Self::Processing),
            "queued" => Some(Self::Queued),
            _ => None,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
enum FileSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// A file selected for upload. Contents are read only when the batch is submitted.
#[derive(Debug, Clone)]
pub struct UploadFile {
    name: String,
    content_type: String,
    source: FileSource,
}

impl UploadFile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| TrackerError::InvalidFile(path.display().to_string()))?
            .to_string();

        Ok(Self {
            content_type: content_type_for(&name).to_string(),
            name,
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name: name.into(),
            content_type: content_type.into(),
            source: FileSource::Bytes(Arc::from(bytes)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// `fileType` value the upload endpoint expects.
    pub(crate) fn transport_file_type(&self) -> &'static str {
        if self.content_type.to_ascii_lowercase().contains("pdf") {
            "pdf"
        } else {
            "jpeg"
        }
    }

    pub(crate) async fn read(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            FileSource::Path(path) => tokio::fs::read(path).await,
            FileSource::Bytes(bytes) => Ok(bytes.to_vec()),
        }
    }
}

fn content_type_for(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct UploadItem {
    id: UploadId,
    file: UploadFile,
    name: String,
    status: UploadStatus,
    progress: u8,
    exam_id: Option<i64>,
    error: Option<String>,
    created_at: Instant,
}

impl UploadItem {
    pub(crate) fn new(file: UploadFile) -> Self {
        Self {
            id: UploadId::new(),
            name: file.name().to_string(),
            file,
            status: UploadStatus::Uploading,
            progress: 0,
            exam_id: None,
            error: None,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> UploadId {
        self.id
    }

    pub fn file(&self) -> &UploadFile {
        &self.file
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    /// 0..=100, only meaningful while uploading.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn exam_id(&self) -> Option<i64> {
        self.exam_id
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Queued or processing with an exam id the server can report on.
    pub fn is_awaiting_server(&self) -> bool {
        self.status.is_pollable() && self.exam_id.is_some()
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Applies `next` if the state machine allows it. Returns whether the status changed.
    pub(crate) fn transition(&mut self, next: UploadStatus, error: Option<String>) -> bool {
        if self.status == next {
            return false;
        }
        if !self.status.can_transition_to(next) {
            tracing::debug!(
                upload_id = %self.id,
                from = %self.status,
                to = %next,
                "Ignoring disallowed upload status transition"
            );
            return false;
        }

        self.status = next;
        if next == UploadStatus::Failed {
            self.error = error;
        }
        true
    }

    /// First assignment wins.
    pub(crate) fn assign_exam_id(&mut self, exam_id: i64) -> bool {
        if self.exam_id.is_some() {
            return false;
        }
        self.exam_id = Some(exam_id);
        true
    }

    pub(crate) fn set_progress(&mut self, progress: u8) {
        if self.status == UploadStatus::Uploading {
            self.progress = progress.min(100);
        }
    }
}
