use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationVariant {
    Default,
    Destructive,
}

/// A user-facing toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub variant: NotificationVariant,
}

/// Cached views that must be refetched after an exam finishes analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Exams,
    LatestHealthMetrics,
}

impl QueryKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exams => "/api/exams",
            Self::LatestHealthMetrics => "/api/health-metrics/latest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    Notify(Notification),
    Invalidate(QueryKey),
}

#[derive(Debug, Clone)]
pub(crate) struct NotificationRelay {
    tx: mpsc::UnboundedSender<TrackerEvent>,
}

impl NotificationRelay {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: TrackerEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Tracker event receiver dropped");
        }
    }

    fn notify(&self, title: &str, description: String, variant: NotificationVariant) {
        self.send(TrackerEvent::Notify(Notification {
            title: title.to_string(),
            description,
            variant,
        }));
    }

    pub(crate) fn batch_accepted(&self) {
        self.notify(
            "Upload started",
            "Your files are being processed in the background.".to_string(),
            NotificationVariant::Default,
        );
    }

    pub(crate) fn batch_failed(&self, message: &str) {
        self.notify("Upload failed", message.to_string(), NotificationVariant::Destructive);
    }

    pub(crate) fn analysis_completed(&self, name: &str) {
        self.notify(
            "Analysis complete",
            format!("Exam {name} was processed successfully."),
            NotificationVariant::Default,
        );
        self.send(TrackerEvent::Invalidate(QueryKey::Exams));
        self.send(TrackerEvent::Invalidate(QueryKey::LatestHealthMetrics));
    }

    pub(crate) fn processing_failed(&self, name: &str, reason: Option<&str>) {
        let description = match reason {
            Some(reason) => format!("Failed to process {name}: {reason}"),
            None => format!("Failed to process {name}."),
        };
        self.notify("Processing error", description, NotificationVariant::Destructive);
    }
}
