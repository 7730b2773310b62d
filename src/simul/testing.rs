//! Deterministic model used by the unit tests.
//!
//! ASR re-decodes from scratch (one token per `frames_per_token` encoder
//! frames), translation appends one token per upstream token and carries the
//! number of decoded positions as its state, and unit generation appends
//! `units_per_token` units per upstream token.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{AgentConfig, FeatureConfig, PolicyConfig, TrackConfig};
use crate::error::{DecodeError, ResourceReleaseError};
use crate::simul::features::FeatureFrame;
use crate::simul::model::{DecodeOutput, DecodeRequest, EncoderOutput, SpeechModel};
use crate::simul::vocab::{TextStyle, Vocabulary};
use crate::types::{Task, TokenId};

pub(crate) const TEST_SYMBOLS: [&str; 6] = ["▁the", "▁cat", "s", "▁sat", "▁on", "▁mat"];

fn token_at(position: usize, offset: usize) -> TokenId {
    TokenId(4 + ((position + offset) % TEST_SYMBOLS.len()) as u32)
}

pub(crate) struct ScriptedModel {
    frames_per_token: usize,
    units_per_token: usize,
    failing_task: Mutex<Option<Task>>,
    fail_encode: AtomicBool,
    fail_release: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(Task, Option<usize>)>>,
    releases: AtomicUsize,
    encodes: AtomicUsize,
}

impl ScriptedModel {
    pub(crate) fn new(frames_per_token: usize) -> Self {
        Self {
            frames_per_token: frames_per_token.max(1),
            units_per_token: 2,
            failing_task: Mutex::new(None),
            fail_encode: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
            encodes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_task(&self, task: Option<Task>) {
        *self.failing_task.lock() = task;
    }

    pub(crate) fn fail_encode(&self, fail: bool) {
        self.fail_encode.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// `(task, upstream length)` for every decode step, in call order.
    pub(crate) fn calls(&self) -> Vec<(Task, Option<usize>)> {
        self.calls.lock().clone()
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub(crate) fn encodes(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SpeechModel for ScriptedModel {
    type State = usize;

    async fn encode(&self, frames: &[FeatureFrame]) -> Result<EncoderOutput, DecodeError> {
        self.pause().await;
        if self.fail_encode.load(Ordering::SeqCst) {
            return Err(DecodeError::Encoder("scripted encoder failure".into()));
        }
        self.encodes.fetch_add(1, Ordering::SeqCst);
        let data = frames
            .iter()
            .map(|f| f.as_slice().first().copied().unwrap_or(0.0))
            .collect();
        EncoderOutput::new(frames.len(), 1, data)
    }

    async fn decode_step(
        &self,
        request: DecodeRequest<'_>,
        state: Option<&usize>,
    ) -> Result<DecodeOutput<usize>, DecodeError> {
        self.pause().await;
        self.calls
            .lock()
            .push((request.task, request.upstream.map(|u| u.len())));
        if *self.failing_task.lock() == Some(request.task) {
            return Err(DecodeError::Decoder {
                task: request.task,
                message: "scripted decoder failure".into(),
            });
        }

        match request.task {
            Task::Asr => {
                let count = request.encoder_output.frames() / self.frames_per_token;
                Ok(DecodeOutput::full(
                    (0..count).map(|i| token_at(i, 0)).collect(),
                ))
            }
            Task::Translation | Task::Unit => {
                let per_token = if request.task == Task::Unit {
                    self.units_per_token
                } else {
                    1
                };
                let target = request.upstream.map(|u| u.len()).unwrap_or(0) * per_token;
                let decoded = state.copied().unwrap_or(0);
                let tokens: Vec<TokenId> = (decoded..target.max(decoded))
                    .take(request.max_new_tokens)
                    .map(|i| token_at(i, 3))
                    .collect();
                let next = decoded + tokens.len();
                Ok(DecodeOutput::append(tokens, next))
            }
        }
    }

    fn release_state(&self, task: Task, _state: usize) -> Result<(), ResourceReleaseError> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ResourceReleaseError {
                task,
                message: "scripted release failure".into(),
            });
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn vocabulary(&self, _task: Task) -> Option<Arc<Vocabulary>> {
        Some(Arc::new(Vocabulary::from_symbols(TEST_SYMBOLS)))
    }
}

/// 16 kHz, 10/25 ms framing, small feature width.
pub(crate) fn test_config() -> AgentConfig {
    AgentConfig {
        features: FeatureConfig {
            sample_rate_hz: 16000,
            target_sample_rate_hz: 16000,
            feature_dim: 8,
            ..Default::default()
        },
        policy: PolicyConfig::default(),
        tracks: vec![TrackConfig::primary(Task::Asr)],
        sink: Default::default(),
    }
}

/// ASR → translation (primary) → units.
pub(crate) fn cascade_config() -> AgentConfig {
    AgentConfig {
        tracks: vec![
            TrackConfig::primary(Task::Asr).with_primary(false),
            TrackConfig::dependent(Task::Translation, Task::Asr).with_primary(true),
            TrackConfig::dependent(Task::Unit, Task::Translation).with_style(TextStyle::Units),
        ],
        ..test_config()
    }
}

pub(crate) fn tone(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 * 0.05).sin() * 0.3)
        .collect()
}
