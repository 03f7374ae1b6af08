pub(crate) mod core;
pub mod schemas;
pub mod services;
pub mod tracker;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

use crate::core::{config::Settings, telemetry};
use crate::services::exam_api::HttpExamApi;
use crate::tracker::{
    BatchHandle, NotificationVariant, TrackerEvent, UploadFile, UploadStatus, UploadTracker,
};

pub use crate::services::exam_api::{ExamApi, ExamApiError};
pub use crate::tracker::{TrackerConfig, TrackerError};

/// Upload exam files for a patient profile and follow their analysis.
#[derive(Debug, Parser)]
#[command(name = "vitaview-upload", version)]
struct Cli {
    /// Profile (patient record) the exams belong to.
    #[arg(env = "VITAVIEW_PROFILE_ID")]
    profile_id: i64,
    /// PDF or image files, submitted as one batch.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let files = cli
        .files
        .iter()
        .map(UploadFile::from_path)
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid upload file")?;

    let api = HttpExamApi::from_settings(&settings)?;
    let (tracker, mut events) = UploadTracker::new(Arc::new(api), settings.tracker_config());

    tracing::info!(
        api_url = %settings.api().base_url.as_str(),
        environment = %settings.runtime().environment.as_str(),
        profile_id = cli.profile_id,
        files = files.len(),
        "Submitting exam uploads"
    );

    let batch = tracker.upload_files(files, cli.profile_id).await?;

    tokio::select! {
        _ = wait_until_settled(&tracker, &mut events, batch) => {}
        signal = core::shutdown::shutdown_signal() => {
            tracing::warn!(signal = signal.as_str(), "Interrupted before every upload settled");
        }
    }

    tracker.shutdown().await;
    while let Ok(event) = events.try_recv() {
        log_event(&event);
    }

    let uploads = tracker.uploads().await;
    for item in &uploads {
        tracing::info!(
            file = %item.name(),
            status = %item.status(),
            exam_id = ?item.exam_id(),
            error = item.error().unwrap_or(""),
            "Upload result"
        );
    }

    if let Some(rendered) = core::metrics::render() {
        tracing::debug!(metrics = %rendered, "Upload metrics");
    }

    let failed = uploads.iter().filter(|item| item.status() == UploadStatus::Failed).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} uploads failed", uploads.len());
    }

    Ok(())
}

async fn wait_until_settled(
    tracker: &UploadTracker,
    events: &mut mpsc::UnboundedReceiver<TrackerEvent>,
    batch: BatchHandle,
) {
    batch.finished().await;

    loop {
        while let Ok(event) = events.try_recv() {
            log_event(&event);
        }

        let pending = tracker.uploads().await.iter().any(|item| {
            item.status() == UploadStatus::Uploading || item.is_awaiting_server()
        });
        if !pending {
            break;
        }

        tokio::select! {
            Some(event) = events.recv() => log_event(&event),
            _ = tokio::time::sleep(tracker.config().poll_interval) => {}
        }
    }
}

fn log_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::Notify(notification) => match notification.variant {
            NotificationVariant::Default => {
                tracing::info!(description = %notification.description, "{}", notification.title)
            }
            NotificationVariant::Destructive => {
                tracing::warn!(description = %notification.description, "{}", notification.title)
            }
        },
        TrackerEvent::Invalidate(key) => {
            tracing::debug!(query_key = key.as_str(), "Cached view invalidated");
        }
    }
}
