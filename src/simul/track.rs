//! Per-task incremental decode state.
//!
//! A [`DecodeTrack`] owns one task's finalized tokens, their rendered text, the
//! model's carried incremental state, and how much of the text has already been
//! handed to the consumer. Updates are computed first ([`DecodeTrack::decode`])
//! and applied second ([`DecodeTrack::apply`]), so a failed model call never
//! leaves a track half-updated.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{with_timeout, DecodeError};
use crate::simul::model::{DecodeRequest, EncoderOutput, Hypothesis, SpeechModel};
use crate::simul::vocab::{TextStyle, Vocabulary};
use crate::types::{Task, TokenId};

/// Finalized output of a track after an update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalizedSpan<'a> {
    /// All finalized tokens of the utterance
    pub tokens: &'a [TokenId],

    /// Rendered text of `tokens`
    pub text: &'a str,

    /// Tokens added by the update
    pub appended: usize,
}

/// A computed but not yet applied track update.
#[derive(Debug)]
pub struct TrackUpdate<S> {
    tokens: Vec<TokenId>,
    text: String,
    state: Option<S>,
    appended: usize,
}

impl<S> TrackUpdate<S> {
    /// Finalized tokens the track will hold once applied.
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }
}

/// Decode state for one task.
pub struct DecodeTrack<S> {
    task: Task,
    depends_on: Option<Task>,
    style: TextStyle,
    vocabulary: Arc<Vocabulary>,
    max_len: usize,

    /// Finalized tokens; only grows until reset
    finalized: Vec<TokenId>,

    /// Rendered `finalized`
    text: String,

    /// Carried incremental decoder state
    state: Option<S>,

    /// Bytes of `text` already returned by `delta`
    emitted_prefix_len: usize,

    /// Tokens whose text has been returned by `delta`
    emitted_tokens: usize,
}

impl<S> std::fmt::Debug for DecodeTrack<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeTrack")
            .field("task", &self.task)
            .field("finalized", &self.finalized.len())
            .field("text", &self.text)
            .field("emitted_prefix_len", &self.emitted_prefix_len)
            .field("has_state", &self.state.is_some())
            .finish()
    }
}

impl<S> DecodeTrack<S> {
    /// Create an empty track.
    pub fn new(
        task: Task,
        depends_on: Option<Task>,
        style: TextStyle,
        vocabulary: Arc<Vocabulary>,
        max_len: usize,
    ) -> Self {
        Self {
            task,
            depends_on,
            style,
            vocabulary,
            max_len,
            finalized: Vec::new(),
            text: String::new(),
            state: None,
            emitted_prefix_len: 0,
            emitted_tokens: 0,
        }
    }

    /// Task decoded by this track.
    pub fn task(&self) -> Task {
        self.task
    }

    /// Track this one is conditioned on.
    pub fn depends_on(&self) -> Option<Task> {
        self.depends_on
    }

    /// Finalized tokens.
    pub fn tokens(&self) -> &[TokenId] {
        &self.finalized
    }

    /// Finalized text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of finalized tokens.
    pub fn len(&self) -> usize {
        self.finalized.len()
    }

    /// Whether nothing has been finalized.
    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty()
    }

    /// Whether the length cap has been reached.
    pub fn is_full(&self) -> bool {
        self.finalized.len() >= self.max_len
    }

    /// Bytes of finalized text already returned by `delta`.
    pub fn emitted_prefix_len(&self) -> usize {
        self.emitted_prefix_len
    }

    /// Tokens already returned by `delta`.
    pub fn emitted_tokens(&self) -> usize {
        self.emitted_tokens
    }

    /// Whether an incremental state is being carried.
    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    /// Run the model's decode step and compute the resulting update without
    /// touching the track.
    pub async fn decode<M>(
        &self,
        model: &M,
        encoder_output: &EncoderOutput,
        upstream: Option<&[TokenId]>,
        source_finished: bool,
        timeout: Option<Duration>,
    ) -> Result<TrackUpdate<S>, DecodeError>
    where
        M: SpeechModel<State = S> + ?Sized,
    {
        let request = DecodeRequest {
            task: self.task,
            encoder_output,
            upstream,
            finalized: &self.finalized,
            source_finished,
            max_new_tokens: self.max_len.saturating_sub(self.finalized.len()),
        };
        let output = with_timeout(
            model.decode_step(request, self.state.as_ref()),
            timeout,
            "decode step",
        )
        .await?;

        let fresh: Vec<TokenId> = match output.hypothesis {
            Hypothesis::Append(tokens) => tokens,
            Hypothesis::Full(tokens) => {
                let mut tokens: Vec<TokenId> =
                    tokens.into_iter().filter(|t| !is_marker(*t)).collect();
                if tokens.len() > self.finalized.len() {
                    tokens.split_off(self.finalized.len())
                } else {
                    Vec::new()
                }
            }
        };

        if !self.vocabulary.contains_all(&fresh) {
            return Err(DecodeError::Malformed(format!(
                "{} decoder produced a token outside its {}-entry dictionary",
                self.task,
                self.vocabulary.len()
            )));
        }

        let room = self.max_len.saturating_sub(self.finalized.len());
        let mut tokens = self.finalized.clone();
        tokens.extend(fresh.into_iter().filter(|t| !is_marker(*t)).take(room));
        let appended = tokens.len() - self.finalized.len();
        let text = self.vocabulary.render(&tokens, self.style);

        Ok(TrackUpdate {
            tokens,
            text,
            state: output.state,
            appended,
        })
    }

    /// Apply a computed update.
    pub fn apply(&mut self, update: TrackUpdate<S>) -> FinalizedSpan<'_> {
        debug_assert!(update.tokens.starts_with(&self.finalized));
        debug_assert!(update.text.starts_with(&self.text[..self.emitted_prefix_len]));

        self.finalized = update.tokens;
        self.text = update.text;
        if update.state.is_some() {
            self.state = update.state;
        }

        FinalizedSpan {
            tokens: &self.finalized,
            text: &self.text,
            appended: update.appended,
        }
    }

    /// Feed new encoder output through the task's decoder and return the
    /// finalized output so far. On error the track is unchanged.
    pub async fn advance<M>(
        &mut self,
        model: &M,
        encoder_output: &EncoderOutput,
        upstream: Option<&[TokenId]>,
        source_finished: bool,
        timeout: Option<Duration>,
    ) -> Result<FinalizedSpan<'_>, DecodeError>
    where
        M: SpeechModel<State = S> + ?Sized,
    {
        let update = self
            .decode(model, encoder_output, upstream, source_finished, timeout)
            .await?;
        Ok(self.apply(update))
    }

    /// Finalized text not yet returned by a previous call.
    pub fn delta(&mut self) -> String {
        self.delta_limited(self.finalized.len())
    }

    /// Like [`DecodeTrack::delta`], releasing at most the first `max_tokens`
    /// finalized tokens' worth of text.
    pub fn delta_limited(&mut self, max_tokens: usize) -> String {
        let limit = max_tokens.min(self.finalized.len());
        if limit <= self.emitted_tokens {
            return String::new();
        }

        let end = if limit == self.finalized.len() {
            self.text.len()
        } else {
            self.vocabulary
                .render(&self.finalized[..limit], self.style)
                .len()
        };
        let end = end.max(self.emitted_prefix_len);

        let delta = self.text[self.emitted_prefix_len..end].to_string();
        self.emitted_prefix_len = end;
        self.emitted_tokens = limit;
        delta
    }

    /// Clear everything. Never fails: a state that cannot be released is dropped.
    pub fn reset<F>(&mut self, release: F)
    where
        F: FnOnce(Task, S) -> Result<(), crate::error::ResourceReleaseError>,
    {
        if let Some(state) = self.state.take() {
            if let Err(e) = release(self.task, state) {
                debug!(task = %self.task, error = %e, "Ignoring failure while releasing decoder state");
            }
        }
        self.finalized.clear();
        self.text.clear();
        self.emitted_prefix_len = 0;
        self.emitted_tokens = 0;
    }
}

fn is_marker(token: TokenId) -> bool {
    token == TokenId::BOS || token == TokenId::EOS || token == TokenId::PAD
}
