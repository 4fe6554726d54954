//! Infrastructure layer for Flowgate.
//!
//! Contains implementations of the ports defined in `flowgate-core`:
//! SQLite usage storage, the filesystem trigger watcher, notification
//! transports, external command tools, config loading, and the on-disk data
//! directory layout.

pub mod config;
pub mod filesystem;
pub mod notifier;
pub mod sqlite;
pub mod tool;
pub mod workflow;
