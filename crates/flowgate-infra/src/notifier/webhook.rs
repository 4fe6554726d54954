//! Webhook notification transport.
//!
//! Each notification becomes one JSON POST:
//!
//! ```json
//! { "destination": "...", "message": "...",
//!   "attachment": { "file_name": "...", "content_base64": "..." } }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flowgate_core::workflow::notifier::{Notification, Notifier, NotifyError};
use serde::Serialize;

/// Delivers notifications to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    destination: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<AttachmentPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct AttachmentPayload<'a> {
    file_name: &'a str,
    content_base64: String,
}

impl<'a> WebhookPayload<'a> {
    fn from_notification(notification: &'a Notification) -> Self {
        Self {
            destination: &notification.destination,
            message: &notification.message,
            attachment: notification.attachment.as_ref().map(|a| AttachmentPayload {
                file_name: &a.file_name,
                content_base64: STANDARD.encode(&a.bytes),
            }),
        }
    }
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = WebhookPayload::from_notification(notification);

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                url = self.url.as_str(),
                status = status.as_u16(),
                body = body.as_str(),
                "webhook rejected notification"
            );
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(
            url = self.url.as_str(),
            destination = notification.destination.as_str(),
            "notification delivered"
        );
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn send<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(self.deliver(notification))
    }
}
