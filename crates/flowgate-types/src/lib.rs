//! Shared domain types for Flowgate.
//!
//! This crate contains the core domain types used across the Flowgate
//! automation engine: workflow definitions, lifecycle events, tier and usage
//! records, global configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod tier;
pub mod workflow;
