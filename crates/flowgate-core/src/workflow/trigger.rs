//! Trigger watcher port.
//!
//! A `TriggerWatcher` turns a workflow's `TriggerSpec` into a live watch
//! registration that pushes `TriggerEvent`s into a channel owned by the
//! engine. Delivery is at-least-once: duplicate events for the same path are
//! passed through, not deduplicated here.
//!
//! The filesystem implementation lives in `flowgate-infra`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flowgate_types::workflow::WorkflowDefinition;
use tokio::sync::mpsc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Setup failures. These are fatal to `start()`; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// The watch root (or the workflow's sub-directory) cannot be used.
    #[error("watch root '{}' is not accessible: {reason}", path.display())]
    RootInaccessible { path: PathBuf, reason: String },

    /// The underlying watcher could not be created.
    #[error("failed to create watcher: {0}")]
    WatcherCreation(String),

    /// The path could not be registered with the watcher.
    #[error("failed to watch '{}': {reason}", path.display())]
    WatchPath { path: PathBuf, reason: String },
}

// ---------------------------------------------------------------------------
// TriggerEvent
// ---------------------------------------------------------------------------

/// One newly observed resource matching a workflow's trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub workflow_id: Uuid,
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(workflow_id: Uuid, path: impl Into<PathBuf>) -> Self {
        Self {
            workflow_id,
            path: path.into(),
            detected_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerWatcher
// ---------------------------------------------------------------------------

/// Source of trigger events for registered workflows.
pub trait TriggerWatcher: Send + Sync + 'static {
    /// Keeps the watch alive. Dropping it stops event delivery.
    type Handle: Send + 'static;

    /// Start watching for `workflow`'s trigger, sending matches to `events`.
    ///
    /// Must fail (not silently no-op) when the watch root is unusable.
    fn watch(
        &self,
        workflow: &WorkflowDefinition,
        events: mpsc::Sender<TriggerEvent>,
    ) -> Result<Self::Handle, TriggerError>;

    /// The directory that `watch` observes for `workflow`.
    fn watch_path(&self, workflow: &WorkflowDefinition) -> PathBuf;
}

/// Whether a file name looks like an in-progress or hidden write.
///
/// Hidden files (leading `.`) and names ending in any of `ignored_suffixes`
/// never fire a trigger.
pub fn is_transient(path: &Path, ignored_suffixes: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    name.starts_with('.') || ignored_suffixes.iter().any(|s| name.ends_with(s.as_str()))
}
