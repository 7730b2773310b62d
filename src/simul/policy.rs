//! READ/WRITE decision state machine.
//!
//! Each turn extracts any newly available frames, re-encodes the utterance,
//! advances every decode track in dependency order and then decides what to
//! hand back to the harness. All model calls happen before anything in the
//! session is touched; the session is mutated in one block afterwards. A turn
//! that fails, or whose future is dropped mid-await, leaves the session exactly
//! as it was.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{AgentConfig, PolicyConfig};
use crate::error::{with_timeout, ConfigError, DecodeError};
use crate::simul::features::FeatureFrame;
use crate::simul::model::{EncoderOutput, SpeechModel};
use crate::simul::session::{LifecycleController, Session};
use crate::simul::sink::TextSink;
use crate::simul::track::TrackUpdate;
use crate::telemetry::metrics::record_turn_duration;
use crate::types::Task;

/// What the harness should do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Supply more input
    Read,
    /// Consume `content`; `finished` closes the utterance
    Write { content: String, finished: bool },
}

impl Action {
    pub fn is_read(&self) -> bool {
        matches!(self, Action::Read)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Action::Write { .. })
    }

    /// Whether this closes the utterance.
    pub fn is_finished(&self) -> bool {
        matches!(self, Action::Write { finished: true, .. })
    }

    /// WRITE payload, empty for READ.
    pub fn content(&self) -> &str {
        match self {
            Action::Read => "",
            Action::Write { content, .. } => content,
        }
    }
}

/// Policy state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyState {
    /// Waiting for input, or after a failed turn
    AwaitingInput,
    /// At least one partial WRITE issued for the current utterance
    Emitting,
    /// Final WRITE issued; the next input starts a new utterance
    Finished,
}

/// Decides READ or WRITE for a session.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
    samples_per_source_unit: usize,
    sink: Option<TextSink>,
}

impl PolicyEngine {
    /// Build from a validated agent configuration. The text sink is enabled
    /// when `sink.output_dir` is set.
    pub fn new(config: &AgentConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let samples_per_source_unit = config
            .features
            .input_rate()
            .samples_for_ms(config.policy.source_unit_ms);
        if samples_per_source_unit == 0 {
            return Err(ConfigError::Validation(format!(
                "source unit of {}ms is shorter than one sample",
                config.policy.source_unit_ms
            )));
        }

        Ok(Self {
            config: config.policy.clone(),
            samples_per_source_unit,
            sink: config.sink.output_dir.clone().map(TextSink::new),
        })
    }

    /// Replace the text sink.
    pub fn with_sink(mut self, sink: TextSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Policy thresholds.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Source length in lag units for `consumed` input samples.
    pub fn source_units(&self, consumed: usize) -> usize {
        consumed / self.samples_per_source_unit
    }

    /// Primary tokens that may have been emitted after a non-final WRITE.
    pub fn write_budget(&self, source_units: usize) -> usize {
        if self.config.lagging_k == 0 {
            usize::MAX
        } else {
            source_units.saturating_sub(self.config.lagging_k)
        }
    }

    /// Run one policy turn.
    #[instrument(skip_all, fields(session = %session.id()))]
    pub async fn step<M: SpeechModel>(
        &self,
        session: &mut Session<M>,
    ) -> Result<Action, DecodeError> {
        let started = Instant::now();
        let result = self.turn(session).await;
        record_turn_duration(started.elapsed());

        match &result {
            Ok(Action::Read) => session.stats.record_read(),
            Ok(Action::Write { finished, .. }) => session.stats.record_write(*finished),
            Err(e) => {
                session.state = PolicyState::AwaitingInput;
                session.stats.record_decode_failure(failed_task(e));
                debug!(error = %e, "Policy turn failed, session unchanged");
            }
        }
        result
    }

    async fn turn<M: SpeechModel>(
        &self,
        session: &mut Session<M>,
    ) -> Result<Action, DecodeError> {
        let snapshot = session.stream.snapshot();
        let source_finished = snapshot.finished;
        let extraction = session.extractor.pending(snapshot.samples);

        if extraction.is_empty() && !source_finished {
            debug!(
                buffered = session.stream.len(),
                consumed = session.extractor.consumed_samples(),
                "No new frame available"
            );
            if session.state != PolicyState::Emitting {
                session.state = PolicyState::AwaitingInput;
            }
            return Ok(Action::Read);
        }

        if session.frames.is_empty() && extraction.is_empty() {
            // Finished before a single window was complete.
            self.finish(session);
            return Ok(Action::Write {
                content: String::new(),
                finished: true,
            });
        }

        let timeout = self.config.decode_timeout();

        // Re-encode only when the frame sequence grew.
        let (frames, encoder_output) = match (&session.encoder_cache, extraction.is_empty()) {
            (Some(cached), true) => (None, cached.clone()),
            _ => {
                let mut frames: Vec<FeatureFrame> =
                    Vec::with_capacity(session.frames.len() + extraction.frames.len());
                frames.extend_from_slice(&session.frames);
                frames.extend(extraction.frames.iter().cloned());
                let output =
                    with_timeout(session.model.encode(&frames), timeout, "encode").await?;
                (Some(frames), output)
            }
        };

        let updates = self
            .decode_tracks(session, &encoder_output, source_finished)
            .await?;

        // Every await has completed; commit the turn.
        session.extractor.commit(&extraction);
        if let Some(frames) = frames {
            session.frames = frames;
        }
        session.encoder_cache = Some(encoder_output);
        for (track, update) in session.tracks.iter_mut().zip(updates) {
            let task = track.task();
            let span = track.apply(update);
            debug!(%task, tokens = span.tokens.len(), appended = span.appended, "Track advanced");
        }

        self.decide(session, source_finished)
    }

    /// Decode every track in configuration order. A track conditioned on an
    /// earlier one sees that track's update from this turn.
    async fn decode_tracks<M: SpeechModel>(
        &self,
        session: &Session<M>,
        encoder_output: &EncoderOutput,
        source_finished: bool,
    ) -> Result<Vec<TrackUpdate<M::State>>, DecodeError> {
        let timeout = self.config.decode_timeout();
        let mut updates: Vec<TrackUpdate<M::State>> = Vec::with_capacity(session.tracks.len());

        for (index, track) in session.tracks.iter().enumerate() {
            let upstream = track.depends_on().and_then(|dep| {
                session.tracks[..index]
                    .iter()
                    .position(|t| t.task() == dep)
                    .map(|pos| updates[pos].tokens())
            });
            let update = track
                .decode(
                    session.model.as_ref(),
                    encoder_output,
                    upstream,
                    source_finished,
                    timeout,
                )
                .await?;
            updates.push(update);
        }
        Ok(updates)
    }

    fn decide<M: SpeechModel>(
        &self,
        session: &mut Session<M>,
        source_finished: bool,
    ) -> Result<Action, DecodeError> {
        let primary = session.primary;
        let length_capped = self.config.finish_on_max_len && session.tracks[primary].is_full();

        if source_finished || length_capped {
            let content = session.tracks[primary].delta();
            debug!(source_finished, length_capped, "Final WRITE");
            self.finish(session);
            return Ok(Action::Write {
                content,
                finished: true,
            });
        }

        let source_units = self.source_units(session.extractor.consumed_samples());
        let budget = self.write_budget(source_units);
        let track = &mut session.tracks[primary];
        let releasable = budget.min(track.len());
        let fresh = releasable.saturating_sub(track.emitted_tokens());

        if fresh == 0 || fresh < self.config.stride {
            debug!(
                source_units,
                emitted = track.emitted_tokens(),
                finalized = track.len(),
                "Holding output"
            );
            return Ok(self.hold(session));
        }

        let content = track.delta_limited(releasable);
        if content.is_empty() {
            return Ok(self.hold(session));
        }

        session.state = PolicyState::Emitting;
        Ok(Action::Write {
            content,
            finished: false,
        })
    }

    fn hold<M: SpeechModel>(&self, session: &mut Session<M>) -> Action {
        if session.state != PolicyState::Emitting {
            session.state = PolicyState::AwaitingInput;
        }
        Action::Read
    }

    fn finish<M: SpeechModel>(&self, session: &mut Session<M>) {
        LifecycleController::finalize(session, self.sink.as_ref());
        session.state = PolicyState::Finished;
    }
}

fn failed_task(error: &DecodeError) -> Option<Task> {
    match error {
        DecodeError::Decoder { task, .. } => Some(*task),
        _ => None,
    }
}
