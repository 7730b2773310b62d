//! Kaldi-style log mel filterbank for a single analysis window.
//!
//! Each call sees exactly one window of samples and nothing else, which is what
//! lets the sliding extractor produce the same frames whether audio arrives in
//! one piece or in many.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::constants::features::{ENERGY_FLOOR, LOW_FREQ_HZ, PRE_EMPHASIS};
use crate::types::SampleRate;

/// Waveforms are scaled to the 16-bit integer range before analysis.
const WAVEFORM_SCALE: f32 = 32768.0;

fn mel_scale(hz: f32) -> f32 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Povey window: a Hann window raised to the 0.85 power.
fn povey_window(len: usize) -> Vec<f32> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = (len - 1) as f32;
    (0..len)
        .map(|i| {
            let hann = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos();
            hann.powf(0.85)
        })
        .collect()
}

/// One triangular mel filter over a contiguous range of FFT bins.
#[derive(Debug, Clone)]
struct MelFilter {
    first_bin: usize,
    weights: Vec<f32>,
}

/// Precomputed window, FFT plan and mel filters for a fixed window length.
pub struct MelFilterbank {
    window_len: usize,
    fft_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    filters: Vec<MelFilter>,
}

impl std::fmt::Debug for MelFilterbank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelFilterbank")
            .field("window_len", &self.window_len)
            .field("fft_size", &self.fft_size)
            .field("num_bins", &self.filters.len())
            .finish()
    }
}

impl MelFilterbank {
    /// Build a filterbank for windows of `window_len` samples at `rate`.
    pub fn new(window_len: usize, rate: SampleRate, num_bins: usize) -> Self {
        let window_len = window_len.max(1);
        let fft_size = window_len.next_power_of_two();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        let nyquist = rate.value() as f32 / 2.0;
        let low_mel = mel_scale(LOW_FREQ_HZ.min(nyquist));
        let high_mel = mel_scale(nyquist);
        let mel_delta = (high_mel - low_mel) / (num_bins + 1) as f32;
        let bin_hz = rate.value() as f32 / fft_size as f32;
        let n_freqs = fft_size / 2;

        let filters = (0..num_bins)
            .map(|bin| {
                let left = low_mel + bin as f32 * mel_delta;
                let center = left + mel_delta;
                let right = center + mel_delta;

                let mut first_bin = None;
                let mut weights = Vec::new();
                for k in 0..n_freqs {
                    let mel = mel_scale(bin_hz * k as f32);
                    let weight = if mel > left && mel < right {
                        if mel <= center {
                            (mel - left) / (center - left)
                        } else {
                            (right - mel) / (right - center)
                        }
                    } else {
                        0.0
                    };
                    if weight > 0.0 {
                        if first_bin.is_none() {
                            first_bin = Some(k);
                        }
                        weights.push(weight);
                    } else if first_bin.is_some() {
                        break;
                    }
                }
                MelFilter {
                    first_bin: first_bin.unwrap_or(0),
                    weights,
                }
            })
            .collect();

        Self {
            window_len,
            fft_size,
            window: povey_window(window_len),
            fft,
            filters,
        }
    }

    /// Samples per analysis window.
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Number of output bins.
    pub fn num_bins(&self) -> usize {
        self.filters.len()
    }

    /// Compute the log mel energies of one window.
    ///
    /// Input shorter than the window is zero-padded, longer input is truncated.
    pub fn compute(&self, samples: &[f32]) -> Vec<f32> {
        let mut frame = vec![0.0f32; self.window_len];
        let used = samples.len().min(self.window_len);
        for (dst, src) in frame.iter_mut().zip(&samples[..used]) {
            *dst = src * WAVEFORM_SCALE;
        }

        let mean = frame.iter().sum::<f32>() / self.window_len as f32;
        frame.iter_mut().for_each(|s| *s -= mean);

        for i in (1..self.window_len).rev() {
            frame[i] -= PRE_EMPHASIS * frame[i - 1];
        }
        frame[0] -= PRE_EMPHASIS * frame[0];

        let mut buffer: Vec<Complex<f32>> = (0..self.fft_size)
            .map(|i| {
                let value = if i < self.window_len {
                    frame[i] * self.window[i]
                } else {
                    0.0
                };
                Complex::new(value, 0.0)
            })
            .collect();
        self.fft.process(&mut buffer);

        self.filters
            .iter()
            .map(|filter| {
                let energy: f32 = filter
                    .weights
                    .iter()
                    .enumerate()
                    .map(|(offset, w)| w * buffer[filter.first_bin + offset].norm_sqr())
                    .sum();
                energy.max(ENERGY_FLOOR).ln()
            })
            .collect()
    }
}
