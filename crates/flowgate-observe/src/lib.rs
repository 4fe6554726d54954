//! Observability for Flowgate: tracing subscriber and OpenTelemetry wiring.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing};
