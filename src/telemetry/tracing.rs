//! Tracing subscriber setup.
//!
//! The library only emits events; binaries and test harnesses embedding it
//! call [`init_tracing`] once at startup.

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable single-line events.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Configuration for log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Event format.
    pub format: LogFormat,
    /// Include thread ids in each event.
    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Compact,
            thread_ids: true,
        }
    }
}

/// Install the global subscriber.
///
/// Returns an error if a global subscriber is already set.
pub fn init_tracing(
    config: &TracingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = Registry::default().with(env_filter);

    match config.format {
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(config.thread_ids)
                    .compact(),
            )
            .try_init()?,
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(config.thread_ids)
                    .json(),
            )
            .try_init()?,
    }

    info!(format = ?config.format, "Tracing initialized");
    Ok(())
}
