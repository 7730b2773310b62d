//! Simultaneous agent facade.
//!
//! Bundles a [`Session`] with the [`PolicyEngine`] that drives it. The model is
//! shared through an `Arc`, so any number of agents can run side by side on
//! separate tasks.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::{DecodeError, Result};
use crate::simul::audio::{bytes_to_f32_samples, Segment};
use crate::simul::model::SpeechModel;
use crate::simul::policy::{Action, PolicyEngine};
use crate::simul::session::{LifecycleController, Session};
use crate::simul::sink::TextSink;
use crate::telemetry::metrics::SessionStats;

/// One streaming agent: session state plus policy.
pub struct SimulAgent<M: SpeechModel> {
    session: Session<M>,
    engine: PolicyEngine,
}

impl<M: SpeechModel> SimulAgent<M> {
    /// Create an agent. Every configuration problem is reported here.
    pub fn new(model: Arc<M>, config: &AgentConfig) -> Result<Self> {
        let engine = PolicyEngine::new(config)?;
        let session = Session::new(model, config)?;
        Ok(Self { session, engine })
    }

    /// Log finished utterances to `sink`.
    pub fn with_sink(mut self, sink: TextSink) -> Self {
        self.engine = self.engine.with_sink(sink);
        self
    }

    /// Append a segment of samples.
    pub fn push(&mut self, segment: &Segment) {
        self.session.push(segment);
    }

    /// Append a chunk of 16-bit little-endian PCM.
    pub fn push_pcm16(&mut self, audio_bytes: &[u8], finished: bool) {
        let segment = Segment {
            samples: bytes_to_f32_samples(audio_bytes),
            finished,
        };
        self.session.push(&segment);
    }

    /// Run one policy turn.
    pub async fn policy(&mut self) -> std::result::Result<Action, DecodeError> {
        self.engine.step(&mut self.session).await
    }

    /// Abandon the current utterance.
    pub fn reset(&mut self) {
        LifecycleController::reset(&mut self.session);
    }

    pub fn session(&self) -> &Session<M> {
        &self.session
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Per-session counters.
    pub fn stats(&self) -> &SessionStats {
        self.session.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simul::policy::PolicyState;
    use crate::simul::testing::{cascade_config, test_config, tone, ScriptedModel};

    #[test]
    fn test_invalid_config_fails_construction() {
        let mut config = test_config();
        config.features.window_ms = 5;
        config.features.shift_ms = 10;
        assert!(SimulAgent::new(Arc::new(ScriptedModel::new(1)), &config).is_err());

        let mut config = test_config();
        config.tracks[0].primary = false;
        assert!(SimulAgent::new(Arc::new(ScriptedModel::new(1)), &config).is_err());
    }

    #[tokio::test]
    async fn test_pcm16_input() {
        let mut agent = SimulAgent::new(Arc::new(ScriptedModel::new(2)), &test_config()).unwrap();
        let bytes: Vec<u8> = tone(1600)
            .iter()
            .flat_map(|s| ((s * 32767.0) as i16).to_le_bytes())
            .collect();

        agent.push_pcm16(&bytes, true);
        assert_eq!(agent.session().buffered_samples(), 1600);
        let action = agent.policy().await.unwrap();
        assert!(action.is_finished());
        assert_eq!(action.content(), "the cats sat");
        assert_eq!(agent.stats().writes(), 1);
    }

    #[tokio::test]
    async fn test_reset_abandons_utterance() {
        let mut agent = SimulAgent::new(Arc::new(ScriptedModel::new(2)), &cascade_config()).unwrap();
        agent.push(&Segment::new(tone(1600)));
        agent.policy().await.unwrap();
        assert!(agent.session().primary_track().len() > 0);

        agent.reset();
        assert_eq!(agent.session().buffered_samples(), 0);
        assert!(agent.session().primary_track().is_empty());
        assert_eq!(agent.session().state(), PolicyState::AwaitingInput);
        assert_eq!(agent.policy().await.unwrap(), Action::Read);
    }

    #[tokio::test]
    async fn test_sessions_share_model_across_tasks() {
        let model = Arc::new(ScriptedModel::new(3));
        let config = cascade_config();

        let mut handles = Vec::new();
        for offset in 0..2usize {
            let mut agent = SimulAgent::new(Arc::clone(&model), &config).unwrap();
            handles.push(tokio::spawn(async move {
                let audio = tone(3200 + offset * 800);
                let mut output = String::new();
                for chunk in audio.chunks(400) {
                    agent.push(&Segment::new(chunk.to_vec()));
                    output.push_str(agent.policy().await.unwrap().content());
                }
                agent.push(&Segment::last(Vec::new()));
                let last = agent.policy().await.unwrap();
                assert!(last.is_finished());
                output.push_str(last.content());
                output
            }));
        }

        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap());
        }
        assert!(!outputs[0].is_empty());
        assert!(outputs[1].starts_with(&outputs[0]));
        assert!(outputs[1].len() > outputs[0].len());
    }
}
