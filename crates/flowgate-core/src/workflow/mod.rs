//! Automation workflow engine.
//!
//! - `definition` -- YAML workflow files: parsing, validation, discovery
//! - `registry` -- `Action` trait and the kind-name -> implementation registry
//! - `notifier` -- outbound notification port used by `notify`
//! - `actions` -- built-in transform/notify/relocate/delete/delay behaviors
//! - `executor` -- fail-fast sequential pipeline runs with optional gating
//! - `trigger` -- `TriggerWatcher` port and trigger events
//! - `engine` -- registration, watcher lifecycle, trigger dispatch

pub mod actions;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod notifier;
pub mod registry;
pub mod trigger;

pub use actions::BuiltinActions;
pub use engine::{EngineError, EngineStatus, WorkflowEngine, WorkflowSummary};
pub use executor::PipelineExecutor;
pub use notifier::{Attachment, LogNotifier, Notification, Notifier, NotifyError};
pub use registry::{Action, ActionError, ActionRegistry, BoxAction, FnAction};
pub use trigger::{TriggerError, TriggerEvent, TriggerWatcher};
