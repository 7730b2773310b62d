//! The `simulstream` core library.
//!
//! This crate provides the streaming control engine of a simultaneous
//! speech-to-text and speech-to-speech translation agent: it consumes audio as
//! it arrives and decides, turn by turn, whether to read more input or write
//! more output. The neural model is supplied by the caller through the
//! [`simul::SpeechModel`] trait.

pub mod config;
pub mod constants;
pub mod error;
pub mod simul;
pub mod telemetry;
pub mod types;

pub use config::AgentConfig;
pub use error::{AgentError, ConfigError, DecodeError, Result};
pub use simul::{Action, Segment, SimulAgent, SpeechModel};
