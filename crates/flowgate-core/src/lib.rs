//! Business logic and port definitions for Flowgate.
//!
//! This crate defines the "ports" (`UsageStore`, `TriggerWatcher`,
//! `Notifier`) that the infrastructure layer implements. It depends only on
//! `flowgate-types` -- never on `flowgate-infra` or any database crate.

pub mod event;
pub mod quota;
pub mod workflow;
