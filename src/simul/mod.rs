//! Simultaneous speech translation core.
//!
//! This module contains the streaming control engine: sample accumulation,
//! sliding-window feature extraction, per-task incremental decode state, the
//! READ/WRITE policy, and the session lifecycle that ties them together.

mod agent;
pub mod audio;
pub mod fbank;
pub mod features;
pub mod model;
mod policy;
pub mod replay;
mod session;
mod sink;
#[cfg(test)]
pub(crate) mod testing;
mod track;
pub mod vocab;

pub use agent::SimulAgent;
pub use audio::{bytes_to_f32_samples, downmix_to_mono, resample_linear, Segment, SegmentBuffer};
pub use features::{Extraction, FeatureFrame, GlobalCmvn, SlidingFeatureExtractor};
pub use model::{DecodeOutput, DecodeRequest, EncoderOutput, Hypothesis, SpeechModel};
pub use policy::{Action, PolicyEngine, PolicyState};
pub use replay::{replay, ReplayOutcome};
pub use session::{LifecycleController, Session, SessionSnapshot, TrackSnapshot};
pub use sink::TextSink;
pub use track::{DecodeTrack, FinalizedSpan, TrackUpdate};
pub use vocab::{TextStyle, Vocabulary};
