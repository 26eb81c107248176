//! Scalar spectral descriptors for an accumulated window.
//!
//! Centroid and rolloff come from a Hann-windowed magnitude spectrum
//! (rustfft); flux and zero-crossing rate keep their standard time-domain
//! definitions. Consumers only rely on stable scalar ranges, not on a
//! specific estimator.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Energy fraction defining the rolloff frequency.
const ROLLOFF_FRACTION: f32 = 0.85;

/// Per-window scalar descriptors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralDescriptors {
    /// Amplitude-weighted mean frequency, Hz.
    pub centroid_hz: f32,
    /// Frequency below which 85 % of the spectral energy lies, Hz.
    pub rolloff_hz: f32,
    /// Mean absolute first difference of the samples.
    pub flux: f32,
    /// Sign changes divided by window length.
    pub zero_crossing_rate: f32,
}

/// Reusable FFT plan + scratch for descriptor computation.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    size: usize,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let hann: Vec<f32> = (0..size)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
            })
            .collect();
        Self {
            fft,
            hann,
            scratch: vec![Complex::default(); size],
            size,
        }
    }

    /// Compute descriptors over `window`. The spectrum is taken from the
    /// trailing `size` samples; flux and ZCR use the whole window.
    pub fn describe(&mut self, window: &[f32], sample_rate: u32) -> SpectralDescriptors {
        let (centroid_hz, rolloff_hz) = if window.len() >= self.size {
            let tail = &window[window.len() - self.size..];
            for (slot, (&s, &w)) in self.scratch.iter_mut().zip(tail.iter().zip(&self.hann)) {
                *slot = Complex::new(s * w, 0.0);
            }
            self.fft.process(&mut self.scratch);
            self.spectrum_stats(sample_rate)
        } else {
            (0.0, 0.0)
        };

        SpectralDescriptors {
            centroid_hz,
            rolloff_hz,
            flux: flux(window),
            zero_crossing_rate: zero_crossing_rate(window),
        }
    }

    fn spectrum_stats(&self, sample_rate: u32) -> (f32, f32) {
        let half = self.size / 2;
        let bin_hz = sample_rate as f32 / self.size as f32;

        let mut mag_sum = 0.0f32;
        let mut weighted = 0.0f32;
        let mut energy_total = 0.0f32;
        for (k, c) in self.scratch[..half].iter().enumerate() {
            let mag = c.norm();
            mag_sum += mag;
            weighted += k as f32 * bin_hz * mag;
            energy_total += mag * mag;
        }
        if mag_sum <= f32::EPSILON {
            return (0.0, 0.0);
        }

        let centroid = weighted / mag_sum;

        let target = ROLLOFF_FRACTION * energy_total;
        let mut cumulative = 0.0f32;
        let mut rolloff = (half - 1) as f32 * bin_hz;
        for (k, c) in self.scratch[..half].iter().enumerate() {
            cumulative += c.norm_sqr();
            if cumulative >= target {
                rolloff = k as f32 * bin_hz;
                break;
            }
        }
        (centroid, rolloff)
    }
}

/// Mean absolute first difference.
pub fn flux(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let sum: f32 = samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    sum / (samples.len() - 1) as f32
}

/// Sign-change count divided by window length.
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::testsig;
    use approx::assert_relative_eq;

    #[test]
    fn centroid_of_sine_near_its_frequency() {
        let mut analyzer = SpectrumAnalyzer::new(2048);
        let window = testsig::sine(440.0, 0.5, 44_100, 4096);
        let d = analyzer.describe(&window, 44_100);
        // One bin is ~21.5 Hz wide; leakage smears a little either side.
        assert!(
            (d.centroid_hz - 440.0).abs() < 50.0,
            "centroid {} Hz",
            d.centroid_hz
        );
        assert!(d.rolloff_hz >= 400.0 && d.rolloff_hz < 600.0);
    }

    #[test]
    fn noise_has_higher_zcr_than_low_sine() {
        let sine = testsig::sine(110.0, 0.5, 44_100, 4096);
        let noise = testsig::noise(0.5, 4096);
        assert!(zero_crossing_rate(&noise) > zero_crossing_rate(&sine));
    }

    #[test]
    fn zero_window_yields_zero_descriptors() {
        let mut analyzer = SpectrumAnalyzer::new(2048);
        let d = analyzer.describe(&vec![0.0; 4096], 44_100);
        assert_eq!(d.centroid_hz, 0.0);
        assert_eq!(d.rolloff_hz, 0.0);
        assert_eq!(d.flux, 0.0);
        assert_eq!(d.zero_crossing_rate, 0.0);
    }

    #[test]
    fn flux_of_constant_signal_is_zero() {
        assert_relative_eq!(flux(&[0.3; 128]), 0.0);
    }

    #[test]
    fn zcr_of_alternating_signal_is_near_one() {
        let samples: Vec<f32> = (0..128)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert!(zero_crossing_rate(&samples) > 0.9);
    }
}
