//! Domain constants for simulstream.
//!
//! This module contains compile-time constants used throughout the crate.
//! These are separated from runtime configuration to provide clear distinction
//! between values that never change and those that can be configured.

/// Feature extraction constants.
pub mod features {
    use crate::types::SampleRate;

    /// Default frame shift in milliseconds.
    pub const SHIFT_MS: u32 = 10;

    /// Default analysis window in milliseconds.
    pub const WINDOW_MS: u32 = 25;

    /// Default capture rate of incoming audio.
    pub const INPUT_SAMPLE_RATE: SampleRate = SampleRate::HIGH_QUALITY_48KHZ;

    /// Rate the filterbank runs at.
    pub const TARGET_SAMPLE_RATE: SampleRate = SampleRate::STANDARD_16KHZ;

    /// Default number of mel bins per frame.
    pub const FEATURE_DIM: usize = 80;

    /// Pre-emphasis coefficient applied to each window.
    pub const PRE_EMPHASIS: f32 = 0.97;

    /// Lowest mel bin edge in Hz.
    pub const LOW_FREQ_HZ: f32 = 20.0;

    /// Floor applied to filterbank energies before the log.
    pub const ENERGY_FLOOR: f32 = f32::EPSILON;
}

/// Text rendering constants.
pub mod text {
    /// Sentencepiece word-boundary marker.
    pub const BOW_PREFIX: char = '\u{2581}';

    /// Markers removed from rendered text.
    pub const BOS_SYMBOL: &str = "<s>";

    /// End-of-sentence marker.
    pub const EOS_SYMBOL: &str = "</s>";

    /// Padding marker.
    pub const PAD_SYMBOL: &str = "<pad>";

    /// Unknown-token marker, rendered as a space.
    pub const UNK_SYMBOL: &str = "<unk>";
}

/// Policy defaults.
pub mod policy {
    /// Default maximum number of tokens per track and utterance.
    pub const MAX_LEN: usize = 200;

    /// Default amount of audio counted as one source unit for lagging.
    pub const SOURCE_UNIT_MS: u32 = 320;
}
