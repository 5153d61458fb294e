//! Frequency-domain loudness for the local microphone path.
//!
//! Mirrors a browser analyser node: Blackman-windowed 256-point FFT, per-bin
//! exponential smoothing across frames, and a -100..-30 dB range mapped onto
//! byte magnitudes.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::source::VolumeSample;

pub const FFT_SIZE: usize = 256;
pub const BIN_COUNT: usize = FFT_SIZE / 2;

/// Bin smoothing between consecutive frames.
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.3;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

pub struct FrequencyAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Most recent `FFT_SIZE` mono samples, oldest first.
    time_domain: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothing: f32,
}

impl FrequencyAnalyser {
    pub fn new(smoothing: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let n = FFT_SIZE as f32;
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Self {
            fft,
            window,
            time_domain: vec![0.0; FFT_SIZE],
            smoothed: vec![0.0; BIN_COUNT],
            scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    /// Appends mono samples in `[-1, 1]`, keeping only the newest window.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if samples.len() >= FFT_SIZE {
            self.time_domain
                .copy_from_slice(&samples[samples.len() - FFT_SIZE..]);
            return;
        }
        self.time_domain.rotate_left(samples.len());
        let tail = FFT_SIZE - samples.len();
        self.time_domain[tail..].copy_from_slice(samples);
    }

    /// Runs one analysis frame and writes byte magnitudes per bin.
    pub fn byte_frequency_data(&mut self, out: &mut [u8; BIN_COUNT]) {
        for ((slot, sample), w) in self
            .scratch
            .iter_mut()
            .zip(&self.time_domain)
            .zip(&self.window)
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / FFT_SIZE as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (k, byte) in out.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() * scale;
            let mut value = self.smoothing * self.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            if !value.is_finite() {
                value = 0.0;
            }
            self.smoothed[k] = value;

            *byte = if value <= 0.0 {
                0
            } else {
                let db = 20.0 * value.log10();
                let scaled = 255.0 / range * (db - MIN_DECIBELS);
                scaled.clamp(0.0, 255.0) as u8
            };
        }
    }
}

/// Reduces the analyser output to one loudness value per display frame.
pub struct AmplitudeSampler {
    analyser: FrequencyAnalyser,
    bins: [u8; BIN_COUNT],
}

impl AmplitudeSampler {
    pub fn new() -> Self {
        Self {
            analyser: FrequencyAnalyser::new(SMOOTHING_TIME_CONSTANT),
            bins: [0; BIN_COUNT],
        }
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        self.analyser.push_samples(samples);
    }

    pub fn sample(&mut self) -> VolumeSample {
        self.analyser.byte_frequency_data(&mut self.bins);
        volume_from_bins(&self.bins)
    }
}

impl Default for AmplitudeSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// `round(mean / 255 * 100)` over the bins.
pub fn volume_from_bins(bins: &[u8]) -> VolumeSample {
    if bins.is_empty() {
        return VolumeSample::SILENT;
    }
    let sum: u32 = bins.iter().map(|&b| u32::from(b)).sum();
    VolumeSample::from_byte_mean(f64::from(sum) / bins.len() as f64)
}
