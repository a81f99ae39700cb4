//! Observability for Cadence: subscriber setup for structured logs and
//! optional OpenTelemetry span export.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing, LogFormat};
