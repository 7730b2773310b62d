//! Model collaborator contract.
//!
//! The neural model is external. It exposes an encoder over feature frames and
//! a per-task decode step that carries an opaque incremental state. The model
//! object itself holds no per-session state, so one instance can be shared by
//! many sessions behind an `Arc`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DecodeError, ResourceReleaseError};
use crate::simul::features::FeatureFrame;
use crate::simul::vocab::Vocabulary;
use crate::types::{Task, TokenId};

/// Encoder hidden states, row-major `[frames, dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOutput {
    frames: usize,
    dim: usize,
    data: Vec<f32>,
}

impl EncoderOutput {
    /// Wrap encoder output, checking that `data` holds `frames * dim` values.
    pub fn new(frames: usize, dim: usize, data: Vec<f32>) -> Result<Self, DecodeError> {
        if data.len() != frames * dim {
            return Err(DecodeError::Malformed(format!(
                "encoder output has {} values, expected {} frames x {} dims",
                data.len(),
                frames,
                dim
            )));
        }
        Ok(Self { frames, dim, data })
    }

    /// Number of encoder time steps.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Hidden size.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Hidden state at time step `t`.
    pub fn frame(&self, t: usize) -> Option<&[f32]> {
        if t >= self.frames {
            return None;
        }
        Some(&self.data[t * self.dim..(t + 1) * self.dim])
    }

    /// Raw values.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Whether the encoder produced no time steps.
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
}

/// What a decode step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Hypothesis {
    /// Tokens following the track's finalized prefix.
    Append(Vec<TokenId>),
    /// A complete re-decoded hypothesis; only the part past the finalized
    /// length is taken, the finalized prefix is never rewritten.
    Full(Vec<TokenId>),
}

/// Everything a decode step sees.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    /// Task being decoded
    pub task: Task,

    /// Fresh encoder output for this turn
    pub encoder_output: &'a EncoderOutput,

    /// Finalized tokens of the track this one depends on, as of this turn
    pub upstream: Option<&'a [TokenId]>,

    /// This track's finalized tokens before the step
    pub finalized: &'a [TokenId],

    /// Whether the source has finished
    pub source_finished: bool,

    /// Room left before the track hits its length cap
    pub max_new_tokens: usize,
}

/// Result of a decode step.
#[derive(Debug, Clone)]
pub struct DecodeOutput<S> {
    /// Produced tokens
    pub hypothesis: Hypothesis,

    /// Incremental state to carry into the next step, if any
    pub state: Option<S>,
}

impl<S> DecodeOutput<S> {
    /// Output of a decoder that re-decodes from scratch each step.
    pub fn full(tokens: Vec<TokenId>) -> Self {
        Self {
            hypothesis: Hypothesis::Full(tokens),
            state: None,
        }
    }

    /// Output of an incremental decoder.
    pub fn append(tokens: Vec<TokenId>, state: S) -> Self {
        Self {
            hypothesis: Hypothesis::Append(tokens),
            state: Some(state),
        }
    }
}

/// Defines the contract for the speech translation model.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Opaque per-task incremental decoder state.
    type State: Send + Sync + 'static;

    /// Encode all frames of the utterance so far.
    async fn encode(&self, frames: &[FeatureFrame]) -> Result<EncoderOutput, DecodeError>;

    /// Run one decode step for a task.
    ///
    /// The previous state is borrowed, never consumed, so a failed step leaves
    /// it usable.
    async fn decode_step(
        &self,
        request: DecodeRequest<'_>,
        state: Option<&Self::State>,
    ) -> Result<DecodeOutput<Self::State>, DecodeError>;

    /// Tear down a task's incremental state. Failures are ignored by callers.
    fn release_state(&self, task: Task, state: Self::State) -> Result<(), ResourceReleaseError> {
        let _ = (task, state);
        Ok(())
    }

    /// Dictionary used to render a task's tokens, when the model ships one.
    fn vocabulary(&self, task: Task) -> Option<Arc<Vocabulary>> {
        let _ = task;
        None
    }
}
