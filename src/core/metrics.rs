use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Counters the tracker records, with their help text.
const UPLOAD_COUNTERS: &[(&str, &str)] = &[
    ("exam_uploads_total", "Batch submission outcomes per uploaded file"),
    ("exam_status_polls_total", "Exam status requests by outcome"),
    ("exam_upload_transitions_total", "Uploads that reached analyzed or failed while polling"),
];

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    for &(name, help) in UPLOAD_COUNTERS {
        metrics::describe_counter!(name, help);
    }
    let _ = PROM_HANDLE.set(handle);
    tracing::debug!(counters = UPLOAD_COUNTERS.len(), "Prometheus recorder installed");
    Ok(())
}

/// Prometheus text exposition of the upload counters, if the recorder is installed.
pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_counters_are_distinct_and_documented() {
        let mut names: Vec<_> = UPLOAD_COUNTERS.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), UPLOAD_COUNTERS.len());
        assert!(UPLOAD_COUNTERS
            .iter()
            .all(|(name, help)| name.ends_with("_total") && !help.is_empty()));
    }
}
