//! Notification transports for the `notify` action.
//!
//! - `webhook` -- JSON POST to a configured endpoint

pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use flowgate_core::workflow::notifier::{LogNotifier, Notifier};
use flowgate_types::config::NotifierConfig;

pub use webhook::WebhookNotifier;

/// Pick the transport described by `config`.
///
/// A configured webhook URL selects `WebhookNotifier`; otherwise
/// notifications are only logged.
pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, reqwest::Error> {
    match config.webhook_url.as_deref() {
        Some(url) => {
            tracing::info!(url, "delivering notifications via webhook");
            let notifier = WebhookNotifier::new(url, Duration::from_secs(config.timeout_secs))?;
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::info!("no webhook configured, notifications will be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}
