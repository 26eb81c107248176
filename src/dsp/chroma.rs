//! Chromagram extraction from an accumulated sample window.
//!
//! ## Algorithm
//!
//! A single ~23 ms chunk is too short to resolve low guitar fundamentals, so
//! extraction runs over the concatenation of the last few chunks. Per
//! analysis frame (2048 samples, hop 512):
//!
//! 1. Autocorrelation pitch search over lags corresponding to 80–1000 Hz.
//! 2. Frequency → pitch class: `round(12·log2(f/440) + 69) mod 12`.
//! 3. The winning chroma bin is set to 1.0, all others to 0.0.
//!
//! The hard single-bin assignment is a deliberate simplification: a real
//! chord sounds several pitch classes at once, but the classifier is trained
//! against exactly this representation. Frames with no positive
//! autocorrelation (silence) contribute an all-zero row.

use super::{autocorr_peak, spectral};

/// Number of pitch-class bins (C, C#, ..., B).
pub const BIN_COUNT: usize = 12;

/// Analysis frame length in samples.
pub const FRAME_SIZE: usize = 2048;

/// Hop between consecutive analysis frames.
pub const HOP_SIZE: usize = 512;

/// Pitch search range for a guitar signal.
pub const MIN_FUNDAMENTAL_HZ: f32 = 80.0;
pub const MAX_FUNDAMENTAL_HZ: f32 = 1000.0;

/// Ordered sequence of 12-bin pitch-class energy vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Chromagram {
    pub frames: Vec<[f32; BIN_COUNT]>,
    pub sample_rate: u32,
}

impl Chromagram {
    pub fn time_steps(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Chromagram plus the per-window scalar spectral descriptors.
#[derive(Debug, Clone)]
pub struct WindowFeatures {
    pub chromagram: Chromagram,
    pub descriptors: spectral::SpectralDescriptors,
}

/// Estimate the fundamental frequency of one analysis frame.
///
/// Returns `None` for frames without a positive autocorrelation peak in the
/// search range (all-zero or non-periodic input).
pub fn fundamental_frequency(frame: &[f32], sample_rate: u32) -> Option<f32> {
    let min_lag = (sample_rate as f32 / MAX_FUNDAMENTAL_HZ).floor() as usize;
    let max_lag = (sample_rate as f32 / MIN_FUNDAMENTAL_HZ).floor() as usize;
    let (lag, _) = autocorr_peak(frame, min_lag.max(1), max_lag)?;
    Some(sample_rate as f32 / lag as f32)
}

/// Map a frequency to its pitch class (0 = C .. 11 = B).
pub fn pitch_class(freq: f32) -> usize {
    let midi = (12.0 * (freq / 440.0).log2() + 69.0).round() as i32;
    midi.rem_euclid(12) as usize
}

/// Extracts chromagrams and spectral descriptors from accumulated windows.
///
/// Holds the FFT plan and scratch buffers so the hot path allocates only the
/// output frames.
pub struct FeatureExtractor {
    spectrum: spectral::SpectrumAnalyzer,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            spectrum: spectral::SpectrumAnalyzer::new(FRAME_SIZE),
        }
    }

    /// Extract features from one accumulated window.
    ///
    /// Returns `None` when the window is shorter than one analysis frame —
    /// the caller skips classification entirely rather than degrading it.
    pub fn extract(&mut self, window: &[f32], sample_rate: u32) -> Option<WindowFeatures> {
        if window.len() < FRAME_SIZE {
            return None;
        }

        let mut frames = Vec::with_capacity((window.len() - FRAME_SIZE) / HOP_SIZE + 1);
        let mut start = 0;
        while start + FRAME_SIZE <= window.len() {
            let frame = &window[start..start + FRAME_SIZE];
            let mut bins = [0.0f32; BIN_COUNT];
            if let Some(freq) = fundamental_frequency(frame, sample_rate) {
                bins[pitch_class(freq)] = 1.0;
            }
            frames.push(bins);
            start += HOP_SIZE;
        }

        let descriptors = self.spectrum.describe(window, sample_rate);

        Some(WindowFeatures {
            chromagram: Chromagram {
                frames,
                sample_rate,
            },
            descriptors,
        })
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::testsig;

    #[test]
    fn pitch_class_of_reference_a() {
        assert_eq!(pitch_class(440.0), 9);
        assert_eq!(pitch_class(110.0), 9); // A2, two octaves down
        assert_eq!(pitch_class(261.63), 0); // C4
        assert_eq!(pitch_class(329.63), 4); // E4
    }

    #[test]
    fn a2_sine_lands_in_bin_nine() {
        let sample_rate = 44_100;
        // 3 chunks of 1024 samples at the default config
        let window = testsig::sine(110.0, 0.5, sample_rate, 3 * 1024);
        let mut extractor = FeatureExtractor::new();
        let features = extractor.extract(&window, sample_rate).unwrap();

        let est = fundamental_frequency(&window[..FRAME_SIZE], sample_rate).unwrap();
        assert!((est - 110.0).abs() < 5.0, "estimated {est} Hz");

        assert_eq!(features.chromagram.time_steps(), 3);
        for frame in &features.chromagram.frames {
            assert_eq!(frame[9], 1.0);
            assert_eq!(frame.iter().sum::<f32>(), 1.0);
        }
    }

    #[test]
    fn silent_window_yields_zero_rows() {
        let window = vec![0.0f32; 3 * 1024];
        let mut extractor = FeatureExtractor::new();
        let features = extractor.extract(&window, 44_100).unwrap();
        assert_eq!(features.chromagram.time_steps(), 3);
        for frame in &features.chromagram.frames {
            assert!(frame.iter().all(|&b| b == 0.0));
        }
    }

    #[test]
    fn short_window_is_rejected() {
        let window = testsig::sine(110.0, 0.5, 44_100, 1024);
        let mut extractor = FeatureExtractor::new();
        assert!(extractor.extract(&window, 44_100).is_none());
    }

    #[test]
    fn frame_count_follows_hop() {
        let window = testsig::sine(220.0, 0.5, 44_100, FRAME_SIZE + 2 * HOP_SIZE);
        let mut extractor = FeatureExtractor::new();
        let features = extractor.extract(&window, 44_100).unwrap();
        assert_eq!(features.chromagram.time_steps(), 3);
    }
}
