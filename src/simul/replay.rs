//! Offline replay of a recorded utterance.
//!
//! Feeds a sample buffer to an agent in fixed-size segments, answering every
//! READ with the next segment, until the agent issues its final WRITE. This is
//! the loop an evaluation harness runs for each instance.

use serde::Serialize;
use tracing::debug;

use crate::error::DecodeError;
use crate::simul::agent::SimulAgent;
use crate::simul::audio::Segment;
use crate::simul::model::SpeechModel;
use crate::simul::policy::Action;

/// Result of replaying one utterance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayOutcome {
    /// Every action, in order
    pub actions: Vec<Action>,

    /// Concatenated WRITE payloads
    pub output: String,

    /// Milliseconds of source audio delivered before each non-empty WRITE
    pub delays_ms: Vec<u64>,
}

impl ReplayOutcome {
    /// Number of READ actions.
    pub fn reads(&self) -> usize {
        self.actions.iter().filter(|a| a.is_read()).count()
    }

    /// Number of WRITE actions.
    pub fn writes(&self) -> usize {
        self.actions.iter().filter(|a| a.is_write()).count()
    }
}

/// Replay `samples` through `agent` in segments of `segment_len` samples.
///
/// `samples` are interleaved when the agent expects more than one channel. A
/// `segment_len` of zero delivers everything in a single segment.
pub async fn replay<M: SpeechModel>(
    agent: &mut SimulAgent<M>,
    samples: &[f32],
    segment_len: usize,
) -> Result<ReplayOutcome, DecodeError> {
    let segment_len = if segment_len == 0 {
        samples.len().max(1)
    } else {
        segment_len
    };
    let channels = usize::from(agent.session().channels());
    let rate = agent.session().input_rate();

    let mut outcome = ReplayOutcome::default();
    let mut delivered = 0usize;
    let mut source_closed = false;

    loop {
        let action = agent.policy().await?;
        let finished = action.is_finished();
        // The agent closed the utterance early and restarted.
        let exhausted = action.is_read() && source_closed;

        match &action {
            Action::Read if exhausted => {
                debug!("READ after the source was exhausted, stopping replay");
            }
            Action::Read => {
                let end = (delivered + segment_len).min(samples.len());
                let chunk = samples[delivered..end].to_vec();
                delivered = end;
                source_closed = delivered == samples.len();
                agent.push(&Segment {
                    samples: chunk,
                    finished: source_closed,
                });
            }
            Action::Write { content, .. } => {
                if !content.is_empty() {
                    let elapsed = rate.duration_of(delivered / channels.max(1));
                    outcome.delays_ms.push(elapsed.as_millis() as u64);
                    outcome.output.push_str(content);
                }
            }
        }

        outcome.actions.push(action);
        if finished || exhausted {
            break;
        }
    }

    debug!(
        reads = outcome.reads(),
        writes = outcome.writes(),
        delivered,
        "Replay finished"
    );
    Ok(outcome)
}
