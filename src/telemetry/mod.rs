//! Logging and metrics.
//!
//! Structured logging goes through `tracing`; counters and histograms go
//! through the `metrics` facade so the embedding application can install
//! whichever recorder it likes.

pub mod metrics;
pub mod tracing;

pub use self::metrics::{describe_metrics, SessionStats};
pub use self::tracing::{init_tracing, LogFormat, TracingConfig};
