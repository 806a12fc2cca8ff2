//! Telemetry: structured logging via `tracing`.
//!
//! Metrics are emitted through the `metrics` facade at their call sites; no
//! recorder is installed here, so they cost nothing unless an embedder
//! installs one.

mod logging;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
