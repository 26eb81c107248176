//! Signal quality estimation and the pre-classification gate.
//!
//! The gate runs before any feature extraction: chunks without a significant
//! signal are never classified. The metrics themselves are still computed
//! and reported for every chunk so UI consumers can render level meters.

use super::{autocorr_peak, chroma};
use crate::buffering::chunk::AudioChunk;
use crate::ipc::events::QualityMetrics;

/// Gate thresholds — classification is only attempted above both.
pub const GATE_RMS: f32 = 0.02;
pub const GATE_PEAK: f32 = 0.05;

/// Samples below this magnitude are counted toward the noise estimate.
const NOISE_SAMPLE_CEIL: f32 = 0.01;

/// Floor for the noise power estimate, avoids division by zero / log(0).
const NOISE_POWER_FLOOR: f32 = 1e-4;

/// Number of equal sub-windows used for the stability estimate.
const STABILITY_SUBWINDOWS: usize = 10;

/// True when the chunk carries enough signal to be worth classifying.
pub fn gate_passes(chunk: &AudioChunk) -> bool {
    !(chunk.rms <= GATE_RMS || chunk.peak <= GATE_PEAK || chunk.silent)
}

/// Derive SNR, harmonic clarity and temporal stability for one chunk.
///
/// Total on any input: an all-zero chunk yields snr 0, clarity 0,
/// stability 0 rather than an error.
pub fn estimate(chunk: &AudioChunk) -> QualityMetrics {
    let samples = &chunk.samples;

    QualityMetrics {
        snr_db: snr_db(samples),
        clarity: clarity(samples, chunk.sample_rate),
        stability: stability(samples),
    }
}

fn snr_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let signal_power: f32 =
        samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    if signal_power <= 0.0 {
        return 0.0;
    }

    let mut noise_sum = 0.0f32;
    let mut noise_count = 0usize;
    for &s in samples {
        if s.abs() < NOISE_SAMPLE_CEIL {
            noise_sum += s * s;
            noise_count += 1;
        }
    }
    let noise_power = if noise_count == 0 {
        NOISE_POWER_FLOOR
    } else {
        (noise_sum / noise_count as f32).max(NOISE_POWER_FLOOR)
    };

    10.0 * (signal_power / noise_power).log10()
}

fn clarity(samples: &[f32], sample_rate: u32) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let total_energy: f32 =
        samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    if total_energy <= 0.0 {
        return 0.0;
    }

    let min_lag = (sample_rate as f32 / chroma::MAX_FUNDAMENTAL_HZ).floor() as usize;
    let max_lag = (sample_rate as f32 / chroma::MIN_FUNDAMENTAL_HZ).floor() as usize;
    let fundamental_energy = autocorr_peak(samples, min_lag.max(1), max_lag)
        .map(|(_, corr)| corr)
        .unwrap_or(0.0);

    (fundamental_energy / total_energy).clamp(0.0, 1.0)
}

fn stability(samples: &[f32]) -> f32 {
    if samples.len() < STABILITY_SUBWINDOWS {
        return 0.0;
    }
    let sub_len = samples.len() / STABILITY_SUBWINDOWS;
    let rms_values: Vec<f32> = (0..STABILITY_SUBWINDOWS)
        .map(|i| super::rms(&samples[i * sub_len..(i + 1) * sub_len]))
        .collect();

    let mean = rms_values.iter().sum::<f32>() / rms_values.len() as f32;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = rms_values
        .iter()
        .map(|r| (r - mean) * (r - mean))
        .sum::<f32>()
        / rms_values.len() as f32;
    let cv = variance.sqrt() / mean;

    (1.0 - 2.0 * cv).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::testsig;

    fn chunk_of(samples: Vec<f32>) -> AudioChunk {
        AudioChunk::analyze(samples, 44_100, 0)
    }

    #[test]
    fn all_zero_chunk_never_panics_and_reports_zeros() {
        let metrics = estimate(&chunk_of(vec![0.0; 1024]));
        assert_eq!(metrics.snr_db, 0.0);
        assert_eq!(metrics.clarity, 0.0);
        assert_eq!(metrics.stability, 0.0);
    }

    #[test]
    fn gate_rejects_silence_and_low_level_signal() {
        assert!(!gate_passes(&chunk_of(vec![0.0; 1024])));
        // RMS above the silence threshold but below the gate threshold
        assert!(!gate_passes(&chunk_of(vec![0.01; 1024])));
    }

    #[test]
    fn gate_rejects_low_peak() {
        // RMS 0.03 passes, peak 0.04 does not
        let mut samples = vec![0.03f32; 1024];
        samples[0] = 0.04;
        let chunk = chunk_of(samples);
        assert!(chunk.rms > GATE_RMS);
        assert!(!gate_passes(&chunk));
    }

    #[test]
    fn gate_accepts_a_strong_tone() {
        let chunk = chunk_of(testsig::sine(110.0, 0.5, 44_100, 1024));
        assert!(gate_passes(&chunk));
    }

    #[test]
    fn clean_sine_scores_high_clarity_and_stability() {
        let metrics = estimate(&chunk_of(testsig::sine(110.0, 0.5, 44_100, 1024)));
        assert!(metrics.clarity > 0.3, "clarity {}", metrics.clarity);
        assert!(metrics.stability > 0.8, "stability {}", metrics.stability);
        assert!(metrics.snr_db > 10.0, "snr {}", metrics.snr_db);
    }

    #[test]
    fn bursty_signal_scores_low_stability() {
        // Loud first tenth, silent rest — high coefficient of variation.
        let mut samples = vec![0.0f32; 1000];
        for s in samples.iter_mut().take(100) {
            *s = 0.8;
        }
        let metrics = estimate(&chunk_of(samples));
        assert_eq!(metrics.stability, 0.0);
    }
}
