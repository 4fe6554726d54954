//! Workflow infrastructure.
//!
//! - `file_trigger` -- debounced filesystem watcher with glob filtering

pub mod file_trigger;

pub use file_trigger::{FsTriggerWatcher, WatcherHandle};
