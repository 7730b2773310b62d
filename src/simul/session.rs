//! Utterance session and its lifecycle.
//!
//! A [`Session`] owns everything one stream needs: the sample buffer, the
//! extractor cursor, the frames and encoder output of the current utterance,
//! and one [`DecodeTrack`] per task. Nothing here is shared between sessions
//! except the model, which is borrowed read-only.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{ConfigError, Result};
use crate::simul::audio::{Segment, SegmentBuffer};
use crate::simul::features::{FeatureFrame, SlidingFeatureExtractor};
use crate::simul::model::{EncoderOutput, SpeechModel};
use crate::simul::policy::PolicyState;
use crate::simul::sink::TextSink;
use crate::simul::track::DecodeTrack;
use crate::simul::vocab::Vocabulary;
use crate::telemetry::metrics::{record_reset, SessionStats};
use crate::types::{SampleRate, Task, TokenId};

/// State of one stream.
pub struct Session<M: SpeechModel> {
    pub(crate) id: Uuid,
    pub(crate) model: Arc<M>,
    pub(crate) input_rate: SampleRate,
    pub(crate) stream: SegmentBuffer,
    pub(crate) extractor: SlidingFeatureExtractor,
    pub(crate) frames: Vec<FeatureFrame>,
    pub(crate) encoder_cache: Option<EncoderOutput>,
    pub(crate) tracks: Vec<DecodeTrack<M::State>>,
    pub(crate) sink_files: Vec<String>,
    pub(crate) primary: usize,
    pub(crate) state: PolicyState,
    pub(crate) stats: SessionStats,
}

impl<M: SpeechModel> Session<M> {
    /// Build a session. Fails on invalid configuration or a track without a dictionary.
    pub fn new(model: Arc<M>, config: &AgentConfig) -> Result<Self> {
        config.validate()?;
        let extractor = SlidingFeatureExtractor::from_config(&config.features)?;

        let mut tracks = Vec::with_capacity(config.tracks.len());
        let mut sink_files = Vec::with_capacity(config.tracks.len());
        for track in &config.tracks {
            let vocabulary = match &track.dictionary_path {
                Some(path) => Arc::new(Vocabulary::load_from_file(path)?),
                None => model.vocabulary(track.task).ok_or_else(|| {
                    ConfigError::Tracks(format!(
                        "no dictionary configured or provided by the model for {}",
                        track.task
                    ))
                })?,
            };
            tracks.push(DecodeTrack::new(
                track.task,
                track.depends_on,
                track.style,
                vocabulary,
                config.policy.max_len,
            ));
            sink_files.push(track.sink_file_name());
        }

        let primary = config
            .tracks
            .iter()
            .position(|t| t.primary)
            .ok_or_else(|| ConfigError::Tracks("no primary track".into()))?;

        let id = Uuid::new_v4();
        debug!(session = %id, tracks = tracks.len(), "Created session");

        Ok(Self {
            id,
            model,
            input_rate: config.features.input_rate(),
            stream: SegmentBuffer::new(config.features.channels),
            extractor,
            frames: Vec::new(),
            encoder_cache: None,
            tracks,
            sink_files,
            primary,
            state: PolicyState::AwaitingInput,
            stats: SessionStats::new(),
        })
    }

    /// Session identifier, used in log spans.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current policy state.
    pub fn state(&self) -> PolicyState {
        self.state
    }

    /// Per-session counters.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Rate of incoming samples.
    pub fn input_rate(&self) -> SampleRate {
        self.input_rate
    }

    /// Interleaved channels expected in pushed segments.
    pub fn channels(&self) -> u16 {
        self.stream.channels()
    }

    /// Append a segment from the harness.
    ///
    /// A segment arriving after the previous utterance finished starts a new one.
    pub fn push(&mut self, segment: &Segment) {
        if self.state == PolicyState::Finished {
            self.state = PolicyState::AwaitingInput;
        }
        self.stream.append(&segment.samples);
        if segment.finished {
            self.stream.mark_finished();
        }
    }

    /// Mono samples buffered for the current utterance.
    pub fn buffered_samples(&self) -> usize {
        self.stream.len()
    }

    /// Whether the current utterance's source has finished.
    pub fn source_finished(&self) -> bool {
        self.stream.is_finished()
    }

    /// Feature frames produced for the current utterance.
    pub fn frames(&self) -> &[FeatureFrame] {
        &self.frames
    }

    /// Track for `task`, if configured.
    pub fn track(&self, task: Task) -> Option<&DecodeTrack<M::State>> {
        self.tracks.iter().find(|t| t.task() == task)
    }

    /// The track whose delta is written out.
    pub fn primary_track(&self) -> &DecodeTrack<M::State> {
        &self.tracks[self.primary]
    }

    /// Observable state, for comparisons in tests and diagnostics.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            samples: self.stream.len(),
            source_finished: self.stream.is_finished(),
            frames_emitted: self.extractor.frames_emitted(),
            cached_frames: self.frames.len(),
            has_encoder_output: self.encoder_cache.is_some(),
            state: self.state,
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackSnapshot {
                    task: t.task(),
                    tokens: t.tokens().to_vec(),
                    text: t.text().to_string(),
                    emitted_prefix_len: t.emitted_prefix_len(),
                    emitted_tokens: t.emitted_tokens(),
                    has_state: t.has_state(),
                })
                .collect(),
        }
    }
}

/// Observable state of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Buffered mono samples
    pub samples: usize,
    /// Source finished flag
    pub source_finished: bool,
    /// Frames the extractor has emitted
    pub frames_emitted: usize,
    /// Frames held for re-encoding
    pub cached_frames: usize,
    /// Whether an encoder output is cached
    pub has_encoder_output: bool,
    /// Policy state
    pub state: PolicyState,
    /// Per-track state
    pub tracks: Vec<TrackSnapshot>,
}

/// Observable state of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    /// Task
    pub task: Task,
    /// Finalized tokens
    pub tokens: Vec<TokenId>,
    /// Finalized text
    pub text: String,
    /// Bytes of text handed out
    pub emitted_prefix_len: usize,
    /// Tokens handed out
    pub emitted_tokens: usize,
    /// Whether decoder state is carried
    pub has_state: bool,
}

/// Reset and finalize semantics spanning every component of a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleController;

impl LifecycleController {
    /// Return the session to its empty state, ready for the next utterance.
    ///
    /// Never fails. Model-side state that cannot be released is dropped and the
    /// failure is only logged. Safe to call at any point, including after an
    /// abandoned turn.
    pub fn reset<M: SpeechModel>(session: &mut Session<M>) {
        session.stream.clear();
        session.extractor.reset();
        session.frames.clear();
        session.encoder_cache = None;
        session.state = PolicyState::AwaitingInput;

        let model = &session.model;
        for track in &mut session.tracks {
            track.reset(|task, state| model.release_state(task, state));
        }

        record_reset();
        debug!(session = %session.id, "Session reset");
    }

    /// Log the finished utterance to the sink, then reset.
    pub fn finalize<M: SpeechModel>(session: &mut Session<M>, sink: Option<&TextSink>) {
        if let Some(sink) = sink {
            for (track, file) in session.tracks.iter().zip(&session.sink_files) {
                sink.append_line(file, track.text());
            }
        }
        info!(
            session = %session.id,
            samples = session.stream.len(),
            frames = session.frames.len(),
            output = %session.tracks[session.primary].text(),
            "Utterance finalized"
        );
        Self::reset(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackConfig;
    use crate::simul::testing::{cascade_config, test_config, tone, ScriptedModel};

    #[test]
    fn test_construction_rejects_bad_window() {
        let mut config = test_config();
        config.features.window_ms = 5;
        let result = Session::new(Arc::new(ScriptedModel::new(1)), &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_construction_needs_a_dictionary() {
        struct NoVocab;

        #[async_trait::async_trait]
        impl SpeechModel for NoVocab {
            type State = ();
            async fn encode(
                &self,
                _frames: &[FeatureFrame],
            ) -> std::result::Result<EncoderOutput, crate::error::DecodeError> {
                EncoderOutput::new(0, 1, Vec::new())
            }
            async fn decode_step(
                &self,
                _request: crate::simul::model::DecodeRequest<'_>,
                _state: Option<&()>,
            ) -> std::result::Result<crate::simul::model::DecodeOutput<()>, crate::error::DecodeError>
            {
                Ok(crate::simul::model::DecodeOutput::full(Vec::new()))
            }
        }

        let err = Session::new(Arc::new(NoVocab), &test_config()).err().unwrap();
        assert!(err.to_string().contains("no dictionary"));
    }

    #[test]
    fn test_tracks_follow_configuration() {
        let session = Session::new(Arc::new(ScriptedModel::new(1)), &cascade_config()).unwrap();
        assert_eq!(session.primary_track().task(), Task::Translation);
        assert_eq!(
            session.track(Task::Unit).and_then(|t| t.depends_on()),
            Some(Task::Translation)
        );
        assert!(session.track(Task::Asr).is_some());
        assert_eq!(session.sink_files, vec!["asr.txt", "st.txt", "unit.txt"]);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut config = test_config();
        config.tracks = vec![TrackConfig::primary(Task::Asr)];
        let mut session = Session::new(Arc::new(ScriptedModel::new(1)), &config).unwrap();
        let pristine = session.snapshot();

        session.push(&Segment::new(tone(1200)));
        session.push(&Segment::last(Vec::new()));
        assert_ne!(session.snapshot(), pristine);

        LifecycleController::reset(&mut session);
        let once = session.snapshot();
        LifecycleController::reset(&mut session);
        assert_eq!(session.snapshot(), once);
        assert_eq!(once, pristine);
    }
}
