//! Lifecycle events published by the workflow engine.
//!
//! `WorkflowEvent` is broadcast on the event bus. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by trigger watchers and pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A workflow's trigger watcher is live.
    WatcherStarted {
        workflow_id: Uuid,
        workflow_name: String,
        path: PathBuf,
    },

    /// A workflow's trigger watcher was torn down.
    WatcherStopped {
        workflow_id: Uuid,
        workflow_name: String,
    },

    /// A trigger fired and a run began.
    RunStarted {
        run_id: Uuid,
        workflow_id: Uuid,
        workflow_name: String,
        resource: PathBuf,
    },

    /// An action finished successfully.
    ActionCompleted {
        run_id: Uuid,
        action_index: usize,
        action_kind: String,
        resource: PathBuf,
        duration_ms: u64,
    },

    /// An action was skipped because no implementation is registered for its kind.
    ActionSkipped {
        run_id: Uuid,
        action_index: usize,
        action_kind: String,
    },

    /// Every action ran without failure.
    RunCompleted {
        run_id: Uuid,
        workflow_name: String,
        trigger_resource: PathBuf,
        actions_completed: u32,
        duration_ms: u64,
    },

    /// An action failed and the run stopped.
    RunFailed {
        run_id: Uuid,
        workflow_name: String,
        trigger_resource: PathBuf,
        action_index: usize,
        action_kind: String,
        error: String,
    },
}

impl WorkflowEvent {
    /// The run this event belongs to, if it is run-scoped.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::ActionCompleted { run_id, .. }
            | WorkflowEvent::ActionSkipped { run_id, .. }
            | WorkflowEvent::RunCompleted { run_id, .. }
            | WorkflowEvent::RunFailed { run_id, .. } => Some(*run_id),

            WorkflowEvent::WatcherStarted { .. } | WorkflowEvent::WatcherStopped { .. } => None,
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::RunCompleted { .. } | WorkflowEvent::RunFailed { .. }
        )
    }
}
