//! Sliding-window feature extraction.
//!
//! Frame `i` covers input samples `[i * shift, i * shift + window)`. The
//! extractor only remembers how many frames it has already produced; because
//! the segment buffer keeps the whole utterance, the unconsumed tail (the
//! residual) is simply everything past the last consumed window.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FeatureConfig;
use crate::error::{ConfigError, ErrorContext, Result};
use crate::simul::audio::resample_linear;
use crate::simul::fbank::MelFilterbank;
use crate::types::SampleRate;

/// Global mean/variance normalization statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalCmvn {
    /// Per-bin mean
    pub mean: Vec<f32>,

    /// Per-bin standard deviation
    pub std: Vec<f32>,
}

impl GlobalCmvn {
    /// Load statistics from a JSON file of the form `{"mean": [...], "std": [...]}`.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading CMVN stats from {}", path.display()))?;
        let stats: GlobalCmvn = serde_json::from_str(&content)?;
        debug!("Loaded CMVN stats with {} bins", stats.mean.len());
        Ok(stats)
    }

    /// Check the statistics against the feature dimension.
    pub fn validate(&self, feature_dim: usize) -> std::result::Result<(), ConfigError> {
        for (field, values) in [("mean", &self.mean), ("std", &self.std)] {
            if values.len() != feature_dim {
                return Err(ConfigError::CmvnDimension {
                    field,
                    actual: values.len(),
                    expected: feature_dim,
                });
            }
        }
        if let Some(idx) = self.std.iter().position(|s| *s == 0.0 || !s.is_finite()) {
            return Err(ConfigError::CmvnStd(idx));
        }
        Ok(())
    }

    /// Normalize a frame in place: `(x - mean) / std`.
    pub fn apply(&self, frame: &mut [f32]) {
        for ((x, mean), std) in frame.iter_mut().zip(&self.mean).zip(&self.std) {
            *x = (*x - mean) / std;
        }
    }
}

/// One fixed-width feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame(pub Vec<f32>);

impl FeatureFrame {
    /// Frame values.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Frame width.
    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

/// Frames computed by [`SlidingFeatureExtractor::pending`], not yet committed.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// New frames in order
    pub frames: Vec<FeatureFrame>,

    /// Index of the first frame in `frames`
    pub first_frame: usize,

    /// Leading input samples covered once these frames are committed
    pub consumed_samples: usize,
}

impl Extraction {
    /// Whether no new frame is available.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame index following the last frame in this extraction.
    pub fn end_frame(&self) -> usize {
        self.first_frame + self.frames.len()
    }
}

/// Converts buffered samples into feature frames, never recomputing a frame.
#[derive(Debug)]
pub struct SlidingFeatureExtractor {
    samples_per_shift: usize,
    samples_per_window: usize,
    input_rate: SampleRate,
    target_rate: SampleRate,
    feature_dim: usize,
    cmvn: Option<GlobalCmvn>,
    fbank: MelFilterbank,

    /// Frames already handed out for the current utterance
    frames_emitted: usize,
}

impl SlidingFeatureExtractor {
    /// Create an extractor; fails when the window is shorter than the shift.
    pub fn new(
        config: &FeatureConfig,
        cmvn: Option<GlobalCmvn>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        if let Some(cmvn) = &cmvn {
            cmvn.validate(config.feature_dim)?;
        }

        let input_rate = config.input_rate();
        let target_rate = config.target_rate();
        let fbank = MelFilterbank::new(
            target_rate.samples_for_ms(config.window_ms),
            target_rate,
            config.feature_dim,
        );

        Ok(Self {
            samples_per_shift: input_rate.samples_for_ms(config.shift_ms),
            samples_per_window: input_rate.samples_for_ms(config.window_ms),
            input_rate,
            target_rate,
            feature_dim: config.feature_dim,
            cmvn,
            fbank,
            frames_emitted: 0,
        })
    }

    /// Create an extractor, loading CMVN statistics from disk if configured.
    pub fn from_config(config: &FeatureConfig) -> Result<Self> {
        let cmvn = config.resolve_cmvn()?;
        Ok(Self::new(config, cmvn)?)
    }

    /// Input samples per frame shift.
    pub fn samples_per_shift(&self) -> usize {
        self.samples_per_shift
    }

    /// Input samples per analysis window.
    pub fn samples_per_window(&self) -> usize {
        self.samples_per_window
    }

    /// Width of produced frames.
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Frames already produced for the current utterance.
    pub fn frames_emitted(&self) -> usize {
        self.frames_emitted
    }

    /// Number of complete windows in `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        let overlap = self.samples_per_window - self.samples_per_shift;
        if len <= overlap {
            return 0;
        }
        (len - overlap) / self.samples_per_shift
    }

    /// Leading samples consumed by the first `frames` frames.
    pub fn consumed_for(&self, frames: usize) -> usize {
        if frames == 0 {
            return 0;
        }
        frames * self.samples_per_shift + (self.samples_per_window - self.samples_per_shift)
    }

    /// Leading samples consumed so far.
    pub fn consumed_samples(&self) -> usize {
        self.consumed_for(self.frames_emitted)
    }

    /// Samples of `total_len` not yet covered by an emitted frame.
    pub fn residual_len(&self, total_len: usize) -> usize {
        total_len.saturating_sub(self.consumed_samples())
    }

    /// Compute the frames `samples` allows beyond those already emitted,
    /// without advancing the extractor.
    pub fn pending(&self, samples: &[f32]) -> Extraction {
        let total = self.frame_count(samples.len());
        let first = self.frames_emitted.min(total);
        let frames = (first..total).map(|idx| self.frame_at(samples, idx)).collect();

        Extraction {
            frames,
            first_frame: first,
            consumed_samples: self.consumed_for(total.max(self.frames_emitted)),
        }
    }

    /// Mark an extraction's frames as emitted.
    pub fn commit(&mut self, extraction: &Extraction) {
        if extraction.first_frame != self.frames_emitted {
            debug!(
                expected = self.frames_emitted,
                got = extraction.first_frame,
                "Ignoring stale extraction"
            );
            return;
        }
        self.frames_emitted = extraction.end_frame();
    }

    /// Compute and commit new frames in one step.
    pub fn extract(&mut self, samples: &[f32]) -> Vec<FeatureFrame> {
        let extraction = self.pending(samples);
        self.commit(&extraction);
        extraction.frames
    }

    /// Offline extraction of every frame in `samples`, ignoring the cursor.
    pub fn extract_all(&self, samples: &[f32]) -> Vec<FeatureFrame> {
        (0..self.frame_count(samples.len()))
            .map(|idx| self.frame_at(samples, idx))
            .collect()
    }

    /// Forget all emitted frames.
    pub fn reset(&mut self) {
        self.frames_emitted = 0;
    }

    fn frame_at(&self, samples: &[f32], idx: usize) -> FeatureFrame {
        let start = idx * self.samples_per_shift;
        let window = &samples[start..start + self.samples_per_window];
        let resampled = resample_linear(window, self.input_rate, self.target_rate);

        let mut values = self.fbank.compute(&resampled);
        if let Some(cmvn) = &self.cmvn {
            cmvn.apply(&mut values);
        }
        FeatureFrame(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_16k() -> FeatureConfig {
        FeatureConfig {
            sample_rate_hz: 16000,
            target_sample_rate_hz: 16000,
            feature_dim: 40,
            ..Default::default()
        }
    }

    fn signal(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| ((i as f32 * 0.07).sin() + (i as f32 * 0.013).cos()) * 0.25)
            .collect()
    }

    #[test]
    fn test_rejects_window_shorter_than_shift() {
        let config = FeatureConfig {
            shift_ms: 25,
            window_ms: 10,
            ..config_16k()
        };
        assert!(SlidingFeatureExtractor::new(&config, None).is_err());
    }

    #[test]
    fn test_frame_arithmetic() {
        let extractor = SlidingFeatureExtractor::new(&config_16k(), None).unwrap();
        assert_eq!(extractor.samples_per_shift(), 160);
        assert_eq!(extractor.samples_per_window(), 400);
        assert_eq!(extractor.frame_count(0), 0);
        assert_eq!(extractor.frame_count(240), 0);
        assert_eq!(extractor.frame_count(399), 0);
        assert_eq!(extractor.frame_count(400), 1);
        assert_eq!(extractor.frame_count(559), 1);
        assert_eq!(extractor.frame_count(560), 2);
        assert_eq!(extractor.frame_count(1000), 4);
        assert_eq!(extractor.consumed_for(4), 880);
    }

    #[test]
    fn test_short_buffer_yields_nothing() {
        let mut extractor = SlidingFeatureExtractor::new(&config_16k(), None).unwrap();
        assert!(extractor.extract(&signal(300)).is_empty());
        assert_eq!(extractor.frames_emitted(), 0);
        assert_eq!(extractor.residual_len(300), 300);
    }

    #[test]
    fn test_incremental_matches_offline() {
        let samples = signal(1000);
        let offline = SlidingFeatureExtractor::new(&config_16k(), None)
            .unwrap()
            .extract_all(&samples);
        assert_eq!(offline.len(), 4);

        let mut extractor = SlidingFeatureExtractor::new(&config_16k(), None).unwrap();
        let mut incremental = Vec::new();
        for end in (200..=1000).step_by(200) {
            incremental.extend(extractor.extract(&samples[..end]));
        }
        assert_eq!(incremental, offline);
        assert_eq!(extractor.consumed_samples(), 880);
        assert_eq!(extractor.residual_len(1000), 120);
    }

    #[test]
    fn test_incremental_matches_offline_with_resampling() {
        let config = FeatureConfig {
            sample_rate_hz: 48000,
            feature_dim: 80,
            ..Default::default()
        };
        let samples = signal(4800);
        let offline = SlidingFeatureExtractor::new(&config, None)
            .unwrap()
            .extract_all(&samples);

        let mut extractor = SlidingFeatureExtractor::new(&config, None).unwrap();
        let mut incremental = Vec::new();
        for end in (0..=4800).step_by(333).chain(std::iter::once(4800)) {
            incremental.extend(extractor.extract(&samples[..end]));
        }
        assert_eq!(incremental, offline);
        assert!(incremental.iter().all(|f| f.dim() == 80));
    }

    #[test]
    fn test_pending_does_not_advance() {
        let extractor = SlidingFeatureExtractor::new(&config_16k(), None).unwrap();
        let samples = signal(800);
        let first = extractor.pending(&samples);
        let second = extractor.pending(&samples);
        assert_eq!(first.frames, second.frames);
        assert_eq!(extractor.frames_emitted(), 0);
    }

    #[test]
    fn test_stale_commit_is_ignored() {
        let mut extractor = SlidingFeatureExtractor::new(&config_16k(), None).unwrap();
        let samples = signal(800);
        let extraction = extractor.pending(&samples);
        extractor.commit(&extraction);
        extractor.commit(&extraction);
        assert_eq!(extractor.frames_emitted(), extraction.end_frame());
    }

    #[test]
    fn test_cmvn_is_applied() {
        let config = FeatureConfig {
            feature_dim: 2,
            ..config_16k()
        };
        let plain = SlidingFeatureExtractor::new(&config, None)
            .unwrap()
            .extract_all(&signal(400));
        let cmvn = GlobalCmvn {
            mean: vec![1.0, -1.0],
            std: vec![2.0, 4.0],
        };
        let normalized = SlidingFeatureExtractor::new(&config, Some(cmvn))
            .unwrap()
            .extract_all(&signal(400));

        let raw = plain[0].as_slice();
        let norm = normalized[0].as_slice();
        assert!((norm[0] - (raw[0] - 1.0) / 2.0).abs() < 1e-5);
        assert!((norm[1] - (raw[1] + 1.0) / 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_cmvn_validation_and_json_load() {
        let bad = GlobalCmvn {
            mean: vec![0.0; 2],
            std: vec![1.0, 0.0],
        };
        assert!(matches!(bad.validate(2), Err(ConfigError::CmvnStd(1))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmvn.json");
        fs::write(&path, r#"{"mean": [0.5, 0.25], "std": [1.0, 2.0]}"#).unwrap();
        let loaded = GlobalCmvn::load_json(&path).unwrap();
        assert_eq!(loaded.mean, vec![0.5, 0.25]);
        loaded.validate(2).unwrap();
    }

    #[test]
    fn test_reset_restarts_cursor() {
        let mut extractor = SlidingFeatureExtractor::new(&config_16k(), None).unwrap();
        let samples = signal(800);
        let first = extractor.extract(&samples);
        extractor.reset();
        assert_eq!(extractor.frames_emitted(), 0);
        assert_eq!(extractor.extract(&samples), first);
    }
}
