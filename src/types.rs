//! Strong typing with newtypes for domain concepts.
//!
//! This module provides type-safe wrappers around primitive types to prevent
//! common errors and provide better API design through the type system.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Sample rate in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleRate(pub u32);

impl SampleRate {
    /// Standard 16kHz sample rate for speech models.
    pub const STANDARD_16KHZ: Self = Self(16000);

    /// High quality 48kHz capture rate.
    pub const HIGH_QUALITY_48KHZ: Self = Self(48000);

    /// Create a new sample rate with validation.
    pub fn new(rate: u32) -> Result<Self, ConfigError> {
        if rate == 0 {
            return Err(ConfigError::Zero("sample rate"));
        }
        if rate > 192000 {
            return Err(ConfigError::Validation(format!(
                "Sample rate {} too high (max 192kHz)",
                rate
            )));
        }
        Ok(Self(rate))
    }

    /// Get the sample rate value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Number of samples covering `ms` milliseconds, truncated.
    pub fn samples_for_ms(self, ms: u32) -> usize {
        (ms as u64 * self.0 as u64 / 1000) as usize
    }

    /// Duration of `samples` samples at this rate.
    pub fn duration_of(self, samples: usize) -> Duration {
        Duration::from_secs_f64(samples as f64 / self.0 as f64)
    }
}

impl std::fmt::Display for SampleRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz", self.0)
    }
}

/// Token ID in a fairseq-style dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u32);

impl TokenId {
    /// Beginning-of-sentence marker.
    pub const BOS: Self = Self(0);

    /// Padding.
    pub const PAD: Self = Self(1);

    /// End-of-sentence marker.
    pub const EOS: Self = Self(2);

    /// Unknown token.
    pub const UNK: Self = Self(3);

    /// Get the token ID value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Index into a dictionary table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "token_{}", self.0)
    }
}

/// The decoding stages a session can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Source-language transcription.
    Asr,
    /// Target-language text translation.
    Translation,
    /// Discrete unit generation for a vocoder.
    Unit,
}

impl Task {
    /// Stable short name, used for log fields, metric labels and sink files.
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Asr => "asr",
            Task::Translation => "st",
            Task::Unit => "unit",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_validation() {
        assert!(SampleRate::new(0).is_err());
        assert!(SampleRate::new(200_000).is_err());
        assert_eq!(SampleRate::new(16000).unwrap(), SampleRate::STANDARD_16KHZ);
    }

    #[test]
    fn test_samples_for_ms() {
        assert_eq!(SampleRate::STANDARD_16KHZ.samples_for_ms(10), 160);
        assert_eq!(SampleRate::STANDARD_16KHZ.samples_for_ms(25), 400);
        assert_eq!(SampleRate::HIGH_QUALITY_48KHZ.samples_for_ms(25), 1200);
        assert_eq!(SampleRate(22050).samples_for_ms(10), 220);
    }

    #[test]
    fn test_task_names() {
        assert_eq!(Task::Translation.to_string(), "st");
        let parsed: Task = serde_json::from_str("\"unit\"").unwrap();
        assert_eq!(parsed, Task::Unit);
    }
}
