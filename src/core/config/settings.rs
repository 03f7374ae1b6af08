use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_u32, parse_u64,
};
use super::types::{
    ApiSettings, BaseUrl, ConfigError, PollingSettings, RuntimeSettings, Settings,
    TelemetrySettings, UploadSettings,
};
use crate::tracker::{TrackerConfig, DEFAULT_LABORATORY_NAME};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(env_optional("VITAVIEW_ENV"));

        let base_url = env_or_default("VITAVIEW_API_URL", "http://localhost:5000");
        let bearer_token = env_optional("VITAVIEW_API_TOKEN");
        let session_cookie = env_optional("VITAVIEW_SESSION_COOKIE");
        let connect_timeout_seconds = parse_u64(
            "VITAVIEW_CONNECT_TIMEOUT_SECONDS",
            env_or_default("VITAVIEW_CONNECT_TIMEOUT_SECONDS", "10"),
        )?;
        let request_timeout_seconds = parse_u64(
            "VITAVIEW_REQUEST_TIMEOUT_SECONDS",
            env_or_default("VITAVIEW_REQUEST_TIMEOUT_SECONDS", "120"),
        )?;
        let max_submit_retries = parse_u32(
            "VITAVIEW_MAX_SUBMIT_RETRIES",
            env_or_default("VITAVIEW_MAX_SUBMIT_RETRIES", "0"),
        )?;

        let laboratory_name = env_or_default("VITAVIEW_LABORATORY_NAME", DEFAULT_LABORATORY_NAME);

        let poll_interval_ms = parse_u64(
            "VITAVIEW_POLL_INTERVAL_MS",
            env_or_default("VITAVIEW_POLL_INTERVAL_MS", "3000"),
        )?;
        let stale_after_seconds = parse_u64(
            "VITAVIEW_STALE_AFTER_SECONDS",
            env_or_default("VITAVIEW_STALE_AFTER_SECONDS", "1800"),
        )?;

        let log_level = env_or_default("VITAVIEW_LOG_LEVEL", "info");
        let json =
            env_optional("VITAVIEW_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment },
            api: ApiSettings {
                base_url: BaseUrl::parse(base_url)?,
                bearer_token,
                session_cookie,
                connect_timeout_seconds,
                request_timeout_seconds,
                max_submit_retries,
            },
            upload: UploadSettings { laboratory_name },
            polling: PollingSettings { poll_interval_ms, stale_after_seconds },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub(crate) fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            poll_interval: self.polling.poll_interval(),
            stale_after: self.polling.stale_after(),
            laboratory_name: self.upload.laboratory_name.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "VITAVIEW_POLL_INTERVAL_MS",
                value: String::from("0"),
            });
        }

        if self.api.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "VITAVIEW_REQUEST_TIMEOUT_SECONDS",
                value: String::from("0"),
            });
        }

        if self.runtime.environment.is_production() && !self.api.base_url.is_local_or_tls() {
            return Err(ConfigError::InsecureBaseUrl(self.api.base_url.as_str().to_string()));
        }

        Ok(())
    }
}
