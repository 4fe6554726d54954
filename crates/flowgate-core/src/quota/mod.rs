//! Quota/tier state and the access gate.
//!
//! - `window` -- daily/monthly boundaries and counter rollover
//! - `store` -- `UsageStore` port plus an in-memory implementation
//! - `gate` -- ordered access checks, per-identity locking, usage charging

pub mod gate;
pub mod store;
pub mod window;

pub use gate::{
    AccessDecision, AccessDenial, AccessGate, Authorization, DenialDetails, DenialReason,
    QuotaError, UsagePermit,
};
pub use store::{InMemoryUsageStore, UsageStore};
