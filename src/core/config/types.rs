use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) api: ApiSettings,
    pub(super) upload: UploadSettings,
    pub(super) polling: PollingSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) base_url: BaseUrl,
    pub(crate) bearer_token: Option<String>,
    pub(crate) session_cookie: Option<String>,
    pub(crate) connect_timeout_seconds: u64,
    pub(crate) request_timeout_seconds: u64,
    pub(crate) max_submit_retries: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct UploadSettings {
    pub(crate) laboratory_name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct PollingSettings {
    pub(crate) poll_interval_ms: u64,
    pub(crate) stale_after_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Backend origin without a trailing slash, e.g. `https://app.vitaview.ai`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BaseUrl(pub(super) String);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid api url: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("insecure api url in production: {0}")]
    InsecureBaseUrl(String),
}

impl BaseUrl {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        let trimmed = value.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidBaseUrl(value));
        }

        let parsed =
            reqwest::Url::parse(trimmed).map_err(|_| ConfigError::InvalidBaseUrl(value.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ConfigError::InvalidBaseUrl(value));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    pub(super) fn is_local_or_tls(&self) -> bool {
        let Ok(parsed) = reqwest::Url::parse(&self.0) else {
            return false;
        };
        if parsed.scheme() == "https" {
            return true;
        }
        matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"))
    }
}

impl ApiSettings {
    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl PollingSettings {
    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_seconds > 0).then(|| Duration::from_secs(self.stale_after_seconds))
    }
}
