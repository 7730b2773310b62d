//! Audio input utilities.
//!
//! This module contains conversions for incoming audio and the append-only
//! [`SegmentBuffer`] that holds one utterance's samples.

use tracing::debug;

use crate::types::SampleRate;

/// Convert raw audio bytes (16-bit little-endian PCM) to floating point samples.
///
/// A trailing odd byte is ignored.
pub fn bytes_to_f32_samples(audio_bytes: &[u8]) -> Vec<f32> {
    audio_bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / 32768.0
        })
        .collect()
}

/// Average interleaved channels into a mono signal.
///
/// `interleaved.len()` must be a multiple of `channels`; any partial trailing
/// frame is dropped.
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linearly resample `samples` from rate `from` to rate `to`.
///
/// Output sample `i` sits at input position `i * from / to`, so resampling a
/// window depends only on that window's samples.
pub fn resample_linear(samples: &[f32], from: SampleRate, to: SampleRate) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to.value() as u64 / from.value() as u64) as usize;
    let step = from.value() as f64 / to.value() as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}

/// A chunk of input delivered by the harness in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    /// Samples, interleaved when the session has more than one channel
    pub samples: Vec<f32>,

    /// Whether this is the last chunk of the utterance
    pub finished: bool,
}

impl Segment {
    /// Create a segment that does not end the utterance.
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            finished: false,
        }
    }

    /// Create the closing segment of an utterance.
    pub fn last(samples: Vec<f32>) -> Self {
        Self {
            samples,
            finished: true,
        }
    }
}

/// Read-only view of the buffered stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamSnapshot<'a> {
    /// All mono samples of the current utterance
    pub samples: &'a [f32],

    /// Whether the source has finished
    pub finished: bool,
}

/// Append-only sample stream for one utterance.
///
/// Once finished, the stream accepts no further samples until it is cleared
/// for the next utterance.
#[derive(Debug)]
pub struct SegmentBuffer {
    /// Mono samples
    samples: Vec<f32>,

    /// Interleaved samples that do not yet form a whole frame
    partial_frame: Vec<f32>,

    /// Channels in incoming chunks
    channels: u16,

    /// Source finished flag
    finished: bool,
}

impl SegmentBuffer {
    /// Create an empty buffer for chunks with `channels` interleaved channels.
    pub fn new(channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            partial_frame: Vec::new(),
            channels: channels.max(1),
            finished: false,
        }
    }

    /// Extend the stream with a chunk.
    pub fn append(&mut self, chunk: &[f32]) {
        if self.finished {
            debug!(
                "Dropping {} samples appended after the source finished",
                chunk.len()
            );
            return;
        }

        if self.channels == 1 {
            self.samples.extend_from_slice(chunk);
            return;
        }

        self.partial_frame.extend_from_slice(chunk);
        let whole = self.partial_frame.len() / self.channels as usize * self.channels as usize;
        let mono = downmix_to_mono(&self.partial_frame[..whole], self.channels);
        self.samples.extend_from_slice(&mono);
        self.partial_frame.drain(..whole);
    }

    /// Mark the source finished. Irreversible until [`SegmentBuffer::clear`].
    pub fn mark_finished(&mut self) {
        self.finished = true;
    }

    /// Current samples plus the finished flag.
    pub fn snapshot(&self) -> StreamSnapshot<'_> {
        StreamSnapshot {
            samples: &self.samples,
            finished: self.finished,
        }
    }

    /// Number of mono samples buffered.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the source has finished.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Interleaved channels per incoming frame.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Start a new utterance.
    pub(crate) fn clear(&mut self) {
        self.samples.clear();
        self.partial_frame.clear();
        self.finished = false;
    }
}
