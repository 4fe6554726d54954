//! Outbound notification port used by the `notify` action.
//!
//! The trait returns a boxed future so it can live behind `Arc<dyn Notifier>`
//! inside the built-in action set. Transports (webhook, log) are implemented
//! in `flowgate-infra` or below.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// A file attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A single message to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Opaque recipient address; meaning depends on the transport.
    pub destination: String,
    pub message: String,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification rejected by recipient: {status}")]
    Rejected { status: u16 },
}

/// Delivers notifications to some external channel.
pub trait Notifier: Send + Sync {
    fn send<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(
                destination = notification.destination.as_str(),
                message = notification.message.as_str(),
                attachment = notification.attachment.as_ref().map(|a| a.file_name.as_str()),
                "notification"
            );
            Ok(())
        })
    }
}

/// Keeps every notification in memory. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn send<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(async move {
            self.sent
                .lock()
                .map_err(|_| NotifyError::Transport("recording buffer poisoned".to_string()))?
                .push(notification.clone());
            Ok(())
        })
    }
}
