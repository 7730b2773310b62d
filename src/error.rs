//! Custom error types for simulstream.
//!
//! This module provides a centralized error handling system using the `thiserror` crate.
//! Errors are split by when they can happen: configuration errors abort construction,
//! decode errors fail a single policy turn, and release errors never leave a reset.

use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::types::Task;

/// Errors detected while validating configuration, always at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The analysis window is shorter than the frame shift.
    #[error("window of {window_ms}ms is shorter than shift of {shift_ms}ms")]
    WindowShorterThanShift {
        /// Configured window length
        window_ms: u32,
        /// Configured shift length
        shift_ms: u32,
    },

    /// A numeric parameter that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Normalization statistics do not match the feature dimension.
    #[error("global CMVN {field} has {actual} entries, expected {expected}")]
    CmvnDimension {
        /// Either "mean" or "std"
        field: &'static str,
        /// Number of entries found
        actual: usize,
        /// Configured feature dimension
        expected: usize,
    },

    /// A CMVN standard deviation entry was zero or not finite.
    #[error("global CMVN std[{0}] must be finite and non-zero")]
    CmvnStd(usize),

    /// Problems with the decode track graph.
    #[error("invalid track configuration: {0}")]
    Tracks(String),

    /// Free-form validation failure.
    #[error("{0}")]
    Validation(String),

    /// Figment could not assemble the configuration.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Errors raised by the model collaborator during a policy turn.
///
/// A turn that fails with one of these leaves the session exactly as it was
/// before the turn started.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The encoder rejected the frames or failed internally.
    #[error("encoder failed: {0}")]
    Encoder(String),

    /// A decode step for one task failed.
    #[error("decoder for {task} failed: {message}")]
    Decoder {
        /// Task whose decoder failed
        task: Task,
        /// Failure description
        message: String,
    },

    /// The model produced output the engine cannot use.
    #[error("malformed model output: {0}")]
    Malformed(String),

    /// A model call exceeded the configured decode timeout.
    #[error("{context}: timed out after {elapsed:?}")]
    Timeout {
        /// What was being awaited
        context: &'static str,
        /// The configured limit
        elapsed: Duration,
    },
}

/// Failure while tearing down model-side incremental state.
///
/// Only ever produced by [`crate::simul::SpeechModel::release_state`]; reset
/// swallows it.
#[derive(Debug, Error)]
#[error("failed to release {task} state: {message}")]
pub struct ResourceReleaseError {
    /// Task whose state could not be released
    pub task: Task,
    /// Failure description
    pub message: String,
}

/// Primary error type for the crate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A policy turn failed.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Errors from the underlying IO system.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors with attached context.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted
        context: String,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl From<figment::Error> for AgentError {
    fn from(err: figment::Error) -> Self {
        AgentError::Config(ConfigError::Load(Box::new(err)))
    }
}

/// Convenience type alias for Results with AgentError.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to the error.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to the error.
    fn with_static_context(self, context: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AgentError::Context {
            context: f(),
            source: Box::new(e),
        })
    }

    fn with_static_context(self, context: &'static str) -> Result<T> {
        self.map_err(|e| AgentError::Context {
            context: context.to_string(),
            source: Box::new(e),
        })
    }
}

/// Await a model call, bounding it by `limit` when one is configured.
///
/// Without a limit the future is awaited as-is.
pub async fn with_timeout<T, F>(
    operation: F,
    limit: Option<Duration>,
    context: &'static str,
) -> std::result::Result<T, DecodeError>
where
    F: Future<Output = std::result::Result<T, DecodeError>>,
{
    match limit {
        None => operation.await,
        Some(limit) => match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => Err(DecodeError::Timeout {
                context,
                elapsed: limit,
            }),
        },
    }
}
