//! Typed audio chunk passed from the ring buffer to the analysis stages.

use crate::dsp;

/// A contiguous block of mono PCM samples at a known sample rate, carrying
/// the per-frame scalar metrics computed at construction.
///
/// Allocated once per pipeline iteration (on the non-RT pipeline thread)
/// and discarded after its result event is emitted.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
    /// Monotonic capture timestamp, milliseconds since engine start.
    pub timestamp_ms: u64,
    /// Root-mean-square amplitude.
    pub rms: f32,
    /// Peak absolute amplitude.
    pub peak: f32,
    /// True when RMS is below the low-signal threshold.
    pub silent: bool,
}

impl AudioChunk {
    /// Build a chunk, computing RMS / peak / silence in one O(n) pass.
    pub fn analyze(samples: Vec<f32>, sample_rate: u32, timestamp_ms: u64) -> Self {
        let rms = dsp::rms(&samples);
        let peak = dsp::peak(&samples);
        let silent = dsp::is_silent(rms);
        Self {
            samples,
            sample_rate,
            timestamp_ms,
            rms,
            peak,
            silent,
        }
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
