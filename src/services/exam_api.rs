use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use thiserror::Error;

use crate::core::config::Settings;
use crate::schemas::exam_upload::{
    extract_error_message, BatchUploadRequest, BatchUploadResponse, ExamStatusResponse,
};

/// Upper bound on the wait between submit retries.
const MAX_SUBMIT_BACKOFF: Duration = Duration::from_secs(60);

fn submit_backoff(attempt: u32) -> Duration {
    2_u64
        .checked_pow(attempt)
        .map(Duration::from_secs)
        .map_or(MAX_SUBMIT_BACKOFF, |backoff| backoff.min(MAX_SUBMIT_BACKOFF))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExamApiError {
    /// No HTTP response was received.
    #[error("{0}")]
    Transport(String),
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response from exam API: {0}")]
    Decode(String),
}

/// Backend operations the upload tracker depends on.
#[async_trait]
pub trait ExamApi: Send + Sync + 'static {
    async fn upload_multiple(
        &self,
        request: &BatchUploadRequest,
    ) -> Result<BatchUploadResponse, ExamApiError>;

    async fn exam_status(&self, exam_id: i64) -> Result<ExamStatusResponse, ExamApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpExamApi {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
    session_cookie: Option<String>,
    max_submit_retries: u32,
}

impl HttpExamApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            session_cookie: None,
            max_submit_retries: 0,
        }
    }

    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api = settings.api();
        let client = Client::builder()
            .connect_timeout(api.connect_timeout())
            .timeout(api.request_timeout())
            .build()
            .map_err(|err| anyhow::anyhow!(err).context("Failed to build exam API HTTP client"))?;

        let mut service = Self::new(client, api.base_url.as_str())
            .with_max_submit_retries(api.max_submit_retries);
        if let Some(token) = &api.bearer_token {
            service = service.with_bearer_token(token.clone());
        }
        if let Some(cookie) = &api.session_cookie {
            service = service.with_session_cookie(cookie.clone());
        }
        Ok(service)
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    /// Retries apply only when no response arrived at all.
    pub fn with_max_submit_retries(mut self, retries: u32) -> Self {
        self.max_submit_retries = retries;
        self
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        match &self.session_cookie {
            Some(cookie) => builder.header(reqwest::header::COOKIE, cookie),
            None => builder,
        }
    }
}

#[async_trait]
impl ExamApi for HttpExamApi {
    async fn upload_multiple(
        &self,
        request: &BatchUploadRequest,
    ) -> Result<BatchUploadResponse, ExamApiError> {
        let endpoint = format!("{}/api/exams/upload-multiple", self.base_url);

        let mut attempt = 0;
        let response = loop {
            match self.authorize(self.client.post(&endpoint)).json(request).send().await {
                Ok(response) => break response,
                Err(err) if attempt < self.max_submit_retries => {
                    let backoff = submit_backoff(attempt);
                    tracing::warn!(
                        error = %err,
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs(),
                        "Exam batch upload failed before a response, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(ExamApiError::Transport(err.to_string())),
            }
        };

        let (status, parsed) = read_json(response).await?;
        if !status.is_success() {
            return Err(ExamApiError::Rejected {
                status: status.as_u16(),
                message: parsed
                    .as_ref()
                    .and_then(extract_error_message)
                    .unwrap_or_else(|| "upload failed".to_string()),
            });
        }

        let parsed = parsed.ok_or_else(|| {
            ExamApiError::Decode(format!("upload response is not JSON (status {status})"))
        })?;
        serde_json::from_value(parsed).map_err(|err| ExamApiError::Decode(err.to_string()))
    }

    async fn exam_status(&self, exam_id: i64) -> Result<ExamStatusResponse, ExamApiError> {
        let endpoint = format!("{}/api/exams/{}", self.base_url, exam_id);
        let response = self
            .authorize(self.client.get(&endpoint))
            .send()
            .await
            .map_err(|err| ExamApiError::Transport(err.to_string()))?;

        let (status, parsed) = read_json(response).await?;
        if !status.is_success() {
            return Err(ExamApiError::Rejected {
                status: status.as_u16(),
                message: parsed
                    .as_ref()
                    .and_then(extract_error_message)
                    .unwrap_or_else(|| format!("status request failed ({status})")),
            });
        }

        parsed
            .as_ref()
            .and_then(ExamStatusResponse::from_value)
            .ok_or_else(|| ExamApiError::Decode(format!("exam {exam_id} has no status field")))
    }
}

/// Body as JSON, or `None` when it is empty or not JSON.
async fn read_json(
    response: Response,
) -> Result<(reqwest::StatusCode, Option<Value>), ExamApiError> {
    let status = response.status();
    let raw_body = response.text().await.map_err(|err| ExamApiError::Transport(err.to_string()))?;
    let parsed = serde_json::from_str::<Value>(&raw_body).ok();
    Ok((status, parsed))
}
