//! Blocking pipeline loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → fixed-size chunk at the capture sample rate
//! 2. Resample to the target rate (passthrough when rates match)
//! 3. Build AudioChunk (RMS / peak / silence)
//! 4. Quality estimate + input gate → AudioActivityEvent
//! 5. Once 3 chunks are accumulated, every gate-passing chunk hands the
//!    latest window to the classification worker (bounded, lossy)
//! 6. Broadcast a ChordEvent per chunk, carrying the freshest result
//! ```
//!
//! This entire loop runs in `spawn_blocking`, keeping the Tokio async
//! executor free for I/O. Classification runs on its own worker thread
//! behind a capacity-1 channel: when inference falls behind the audio
//! clock, whole windows are dropped (counted in `droppedFrames`) rather
//! than queued, so a result always describes recent audio.
//!
//! The loop lives as long as `attached` is set: clearing `running` only
//! parks it (capture device kept, input discarded) so a stopped session
//! can restart without reopening the device. Clearing `attached` ends
//! the loop and, on the owning thread, drops the capture stream.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, OnceLock,
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{chunk::AudioChunk, ring::SampleRing, AudioConsumer, Consumer},
    classify::ChordClassifier,
    dsp::{chroma::FeatureExtractor, quality},
    engine::PipelineConfig,
    ipc::events::{AudioActivityEvent, ChordEvent, ClassificationResult, QualityMetrics},
};

/// Chunks accumulated before a window is handed to the classifier.
const WINDOW_CHUNKS: usize = 3;

/// Rolling context kept behind the live chunk, in chunk multiples.
const RING_CHUNKS: usize = 4;

/// Minimum sleep when the ring is empty (avoids busy-wait burning a core).
const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;

/// Smoothing factor for the running average classification latency.
const LATENCY_ALPHA: f64 = 0.1;

/// Counters shared between the pipeline loop, the classification worker
/// and the engine's stats surface. Latency is stored as `f64` bits; the
/// worker is the only writer so the read-modify-write is unobserved.
pub struct PerformanceStats {
    chunks_processed: AtomicU64,
    windows_classified: AtomicU64,
    dropped_frames: AtomicU64,
    gate_rejections: AtomicU64,
    avg_latency_ms_bits: AtomicU64,
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self {
            chunks_processed: AtomicU64::new(0),
            windows_classified: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            gate_rejections: AtomicU64::new(0),
            avg_latency_ms_bits: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl PerformanceStats {
    pub fn reset(&self) {
        self.chunks_processed.store(0, Ordering::Relaxed);
        self.windows_classified.store(0, Ordering::Relaxed);
        self.dropped_frames.store(0, Ordering::Relaxed);
        self.gate_rejections.store(0, Ordering::Relaxed);
        self.avg_latency_ms_bits.store(0f64.to_bits(), Ordering::Relaxed);
    }

    pub fn record_chunk(&self) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window(&self) {
        self.windows_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gate_rejection(&self) {
        self.gate_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Exponential smoothing; the first sample seeds the average directly.
    pub fn record_latency(&self, latency_ms: f64) {
        let prev = f64::from_bits(self.avg_latency_ms_bits.load(Ordering::Relaxed));
        let next = if self.windows_classified.load(Ordering::Relaxed) == 0 && prev == 0.0 {
            latency_ms
        } else {
            prev + LATENCY_ALPHA * (latency_ms - prev)
        };
        self.avg_latency_ms_bits
            .store(next.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            gate_rejections: self.gate_rejections.load(Ordering::Relaxed),
            average_latency_ms: f64::from_bits(self.avg_latency_ms_bits.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub chunks_processed: u64,
    pub windows_classified: u64,
    pub dropped_frames: u64,
    pub gate_rejections: u64,
    pub average_latency_ms: f64,
}

/// One accumulated classification window, handed to the worker thread.
pub struct ClassifyRequest {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub timestamp_ms: u64,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub consumer: AudioConsumer,
    /// Session lifetime: while set, the loop keeps the capture device.
    pub attached: Arc<AtomicBool>,
    /// Processing toggle: cleared by `stop_processing()`, the loop parks.
    pub running: Arc<AtomicBool>,
    pub chord_tx: broadcast::Sender<ChordEvent>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub seq: Arc<AtomicU64>,
    pub capture_sample_rate: u32,
    pub stats: Arc<PerformanceStats>,
    pub window_tx: Sender<ClassifyRequest>,
    pub result_rx: Receiver<ClassificationResult>,
}

/// Run the blocking pipeline until `ctx.attached` becomes false.
pub fn run(mut ctx: PipelineContext) {
    info!("pipeline started");

    let chunk_size = ctx.config.buffer_size;

    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.config.sample_rate,
        chunk_size,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create resampler: {e}");
            return;
        }
    };

    if !resampler.is_passthrough() {
        info!(
            "resampling enabled from={} to={}",
            ctx.capture_sample_rate, ctx.config.sample_rate
        );
    }

    // Scratch buffer drained from the ring each iteration.
    let mut raw = vec![0f32; chunk_size];
    // Resampled samples waiting to fill a whole chunk.
    let mut pending: Vec<f32> = Vec::with_capacity(chunk_size * 2);
    // Rolling context behind the live chunk; classification windows are
    // read back out of it.
    let mut ring = SampleRing::new(chunk_size * RING_CHUNKS);
    // Chunks accumulated toward a full window; saturates at WINDOW_CHUNKS.
    // Every chunk counts — the window slides, it does not tumble.
    let mut chunks_accumulated = 0usize;
    // Samples emitted so far at the target rate, for timestamps.
    let mut emitted_samples: u64 = 0;
    // Independent sequence for activity events.
    let mut activity_seq = 0u64;
    // Metrics of the most recent chunk, reused when a classification
    // result lands with no fresh chunk to carry it.
    let mut last_rms = 0.0f32;
    let mut last_peak = 0.0f32;
    let mut last_silent = true;
    let mut last_quality = QualityMetrics {
        snr_db: 0.0,
        clarity: 0.0,
        stability: 0.0,
    };

    'outer: loop {
        if !ctx.attached.load(Ordering::Relaxed) {
            break;
        }

        if !ctx.running.load(Ordering::Relaxed) {
            // Parked between stop and restart. The capture callback no-ops,
            // the stream stays open; discard anything drained in flight so
            // a restart begins from live audio.
            while ctx.consumer.pop_slice(&mut raw) > 0 {}
            pending.clear();
            ring.clear();
            chunks_accumulated = 0;
            while ctx.result_rx.try_recv().is_ok() {}
            std::thread::sleep(std::time::Duration::from_millis(empty_sleep_ms()));
            continue;
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            // A window can finish classifying after the burst that fed it;
            // deliver the result now rather than letting it go stale.
            if let Ok(result) = ctx.result_rx.try_recv() {
                let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
                let _ = ctx.chord_tx.send(ChordEvent {
                    seq,
                    timestamp_ms: result.timestamp_ms,
                    rms: last_rms,
                    peak: last_peak,
                    silent: last_silent,
                    quality: last_quality,
                    classification: Some(result),
                });
                continue;
            }
            // Nothing to process — yield to avoid burning 100 % CPU
            std::thread::sleep(std::time::Duration::from_millis(empty_sleep_ms()));
            continue;
        }

        let resampled = resampler.process(&raw[..n]);
        if !resampled.is_empty() {
            pending.extend_from_slice(&resampled);
        }

        while pending.len() >= chunk_size {
            let samples: Vec<f32> = pending.drain(..chunk_size).collect();
            let timestamp_ms = emitted_samples * 1000 / ctx.config.sample_rate as u64;
            emitted_samples += chunk_size as u64;

            let chunk = AudioChunk::analyze(samples, ctx.config.sample_rate, timestamp_ms);
            ring.write(&chunk.samples);
            ctx.stats.record_chunk();

            let metrics = quality::estimate(&chunk);
            let gate_passed = quality::gate_passes(&chunk);
            if chunks_accumulated < WINDOW_CHUNKS {
                chunks_accumulated += 1;
            }
            last_rms = chunk.rms;
            last_peak = chunk.peak;
            last_silent = chunk.silent;
            last_quality = metrics;

            let _ = ctx.activity_tx.send(AudioActivityEvent {
                seq: activity_seq,
                rms: chunk.rms,
                gate_passed,
            });
            activity_seq = activity_seq.saturating_add(1);

            if activity_seq % 50 == 0 {
                debug!(
                    rms = format_args!("{:.4}", chunk.rms),
                    gate_passed,
                    chunks_accumulated,
                    "audio level check"
                );
            }

            if gate_passed {
                if chunks_accumulated >= WINDOW_CHUNKS {
                    // Every passing chunk re-attempts classification over
                    // the latest window; the bounded channel is the only
                    // rate limiter.
                    let request = ClassifyRequest {
                        samples: ring.read_latest(chunk_size * WINDOW_CHUNKS),
                        sample_rate: ctx.config.sample_rate,
                        timestamp_ms,
                    };
                    match ctx.window_tx.try_send(request) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // Classifier is behind the audio clock; drop the
                            // window so the next result stays recent.
                            ctx.stats.record_dropped();
                            debug!("classification worker busy — window dropped");
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            warn!("classification worker gone — stopping pipeline");
                            ctx.running.store(false, Ordering::Relaxed);
                            ctx.attached.store(false, Ordering::Relaxed);
                            break 'outer;
                        }
                    }
                }
            } else {
                ctx.stats.record_gate_rejection();
            }

            // The freshest finished classification rides the next event.
            let classification = ctx.result_rx.try_recv().ok();

            let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
            let _ = ctx.chord_tx.send(ChordEvent {
                seq,
                timestamp_ms,
                rms: chunk.rms,
                peak: chunk.peak,
                silent: chunk.silent,
                quality: metrics,
                classification,
            });
        }
    }

    let snap = ctx.stats.snapshot();
    info!(
        chunks_processed = snap.chunks_processed,
        windows_classified = snap.windows_classified,
        dropped_frames = snap.dropped_frames,
        gate_rejections = snap.gate_rejections,
        average_latency_ms = format_args!("{:.2}", snap.average_latency_ms),
        "pipeline stopped"
    );
}

/// Classification worker loop. Exits when the request channel closes.
///
/// Holds the classifier mutex only for the duration of one window, so
/// training (which locks the same model) and live classification never
/// interleave mid-inference.
pub fn classification_worker(
    classifier: Arc<Mutex<ChordClassifier>>,
    request_rx: Receiver<ClassifyRequest>,
    result_tx: Sender<ClassificationResult>,
    stats: Arc<PerformanceStats>,
) {
    let mut extractor = FeatureExtractor::new();

    for request in request_rx.iter() {
        let features = match extractor.extract(&request.samples, request.sample_rate) {
            Some(f) => f,
            None => {
                debug!(
                    samples = request.samples.len(),
                    "window too short for feature extraction"
                );
                continue;
            }
        };

        let outcome = classifier
            .lock()
            .classify(&features.chromagram, request.timestamp_ms);
        match outcome {
            Ok(result) => {
                stats.record_latency(result.latency_ms);
                stats.record_window();
                debug!(
                    label = %result.label,
                    confidence = format_args!("{:.3}", result.confidence),
                    "window classified"
                );
                // Lossy on the result side too: an unread result is stale
                // the moment a newer one exists.
                let _ = result_tx.try_send(result);
            }
            Err(e) => {
                warn!(error = %e, "classification failed");
                stats.record_dropped();
            }
        }
    }

    debug!("classification worker stopped");
}

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("CHORDSENSE_PIPELINE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}
