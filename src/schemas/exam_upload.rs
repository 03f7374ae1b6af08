use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One file inside `POST /api/exams/upload-multiple`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub name: String,
    pub file_type: String,
    /// Standard base64, no `data:` prefix.
    pub file_content: String,
    pub laboratory_name: String,
    pub exam_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadRequest {
    pub files: Vec<FilePayload>,
    pub profile_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadResult {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub exam_id: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchUploadResult {
    pub fn is_queued(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("queued")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUploadResponse {
    #[serde(default)]
    pub results: Vec<BatchUploadResult>,
}

impl BatchUploadResponse {
    /// First result carrying `name`; duplicate names in one batch all resolve to it.
    pub fn result_for(&self, name: &str) -> Option<&BatchUploadResult> {
        self.results.iter().find(|result| result.name == name)
    }
}

/// Processing state of a single exam as reported by `GET /api/exams/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamStatusResponse {
    pub status: String,
    pub processing_error: Option<String>,
}

impl ExamStatusResponse {
    /// Accepts both the flat `{ status, processingError }` shape and the
    /// `{ exam: { status, processingError }, result }` envelope.
    pub fn from_value(payload: &Value) -> Option<Self> {
        let container = match payload.get("exam") {
            Some(exam) if exam.is_object() => exam,
            _ => payload,
        };

        let status = container
            .get("status")
            .and_then(Value::as_str)
            .or_else(|| payload.get("status").and_then(Value::as_str))?
            .to_string();

        let processing_error = container
            .get("processingError")
            .and_then(Value::as_str)
            .or_else(|| payload.get("processingError").and_then(Value::as_str))
            .map(ToString::to_string);

        Some(Self { status, processing_error })
    }
}

/// Extracts a human-readable message from an error body.
pub fn extract_error_message(payload: &Value) -> Option<String> {
    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .map(|message| message.trim())
        .filter(|message| !message.is_empty())
        .map(ToString::to_string)
}
