//! Per-frame signal analysis.
//!
//! The functions in this module are the minimum-cost gate evaluated on every
//! capture callback; everything heavier (quality estimation, chromagram
//! extraction) lives in the submodules and only runs conditionally.

pub mod chroma;
pub mod quality;
pub mod spectral;

/// RMS below this is treated as silence.
pub const SILENCE_RMS: f32 = 0.005;

/// Root-mean-square amplitude of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute amplitude of a sample slice.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Silence decision applied uniformly across the pipeline.
pub fn is_silent(rms: f32) -> bool {
    rms < SILENCE_RMS
}

/// Normalized autocorrelation peak over a lag range (inclusive).
///
/// Returns `(lag, value)` for the lag maximizing
/// `sum(x[i] * x[i + lag]) / (len - lag)`, or `None` when the slice is too
/// short for the range or no lag correlates positively (e.g. all zeros).
pub(crate) fn autocorr_peak(samples: &[f32], min_lag: usize, max_lag: usize) -> Option<(usize, f32)> {
    if min_lag == 0 || max_lag < min_lag || samples.len() <= max_lag {
        return None;
    }
    let mut best: Option<(usize, f32)> = None;
    for lag in min_lag..=max_lag {
        let n = samples.len() - lag;
        let mut corr = 0.0f32;
        for i in 0..n {
            corr += samples[i] * samples[i + lag];
        }
        corr /= n as f32;
        if corr > 0.0 && best.map_or(true, |(_, b)| corr > b) {
            best = Some((lag, corr));
        }
    }
    best
}

#[cfg(test)]
pub(crate) mod testsig {
    //! Synthetic signal generators shared by DSP tests.

    /// Pure sine at `freq` Hz, given amplitude.
    pub fn sine(freq: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    /// Deterministic pseudo-noise (no rand dependency in test helpers).
    pub fn noise(amplitude: f32, len: usize) -> Vec<f32> {
        let mut state = 0x2545_f491u32;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                amplitude * ((state >> 8) as f32 / 8_388_608.0 - 1.0)
            })
            .collect()
    }
}
