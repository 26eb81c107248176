//! `ChordEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! ChordEngine::new()
//!     └─► initialize(cfg)        → model loaded, status = Initializing → Ready
//!         └─► start_processing() → audio open, pipeline spawned, status = Processing
//!             └─► stop_processing() → pipeline parked, device kept, status = Ready
//!                 └─► dispose()  → device released, classifier cleared, status = Idle
//! ```
//!
//! Stop/start cycles are cheap: a stopped session keeps its capture device
//! and pipeline thread parked, and `start_processing()` just unparks them.
//! `dispose()` is the only point that releases the device.
//!
//! State-changing calls are guarded: calling them in the wrong state returns
//! an error rather than panicking. `dispose()` is idempotent.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! `AudioCapture` is therefore created *inside* the `spawn_blocking` closure so
//! it never crosses a thread boundary. A sync oneshot channel propagates any
//! open-device errors back to the `start_processing()` caller. Classification
//! runs on its own worker thread, fed through a bounded channel so inference
//! never stalls the audio loop.

pub mod pipeline;

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::AudioCapture,
    buffering::create_audio_ring,
    classify::{ChordClassifier, ChordVocabulary},
    error::{ChordError, Result},
    ipc::events::{AudioActivityEvent, ChordEvent, EngineStatus, EngineStatusEvent},
    model::{dataset, ModelState, ModelStore, TrainingReport},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Host-facing pipeline configuration.
///
/// The capture toggles (`echo_cancellation`, `noise_suppression`,
/// `auto_gain`) are recorded so hosts can configure their capture layer
/// consistently; the engine itself does not apply them to samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Target sample rate for analysis (Hz). Audio captured at other rates
    /// is resampled. Default: 44100.
    pub sample_rate: u32,
    /// Samples per analysis chunk. Default: 1024.
    pub buffer_size: usize,
    /// Channel count the host captures with; analysis is mono. Default: 1.
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_size: 1_024,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ChordError::InvalidConfig("sampleRate must be non-zero".into()));
        }
        if self.buffer_size == 0 {
            return Err(ChordError::InvalidConfig("bufferSize must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(ChordError::InvalidConfig("channels must be non-zero".into()));
        }
        Ok(())
    }
}

/// The top-level engine handle.
///
/// `ChordEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<ChordEngine>` to share between host app state and
/// event-forwarding async tasks.
pub struct ChordEngine {
    config: Mutex<PipelineConfig>,
    classifier: Arc<Mutex<ChordClassifier>>,
    /// `true` while a capture session holds the audio device (also while
    /// parked between stop and restart).
    attached: Arc<AtomicBool>,
    /// `true` while the pipeline is actively processing.
    running: Arc<AtomicBool>,
    /// Canonical status (written atomically via Mutex, read from commands).
    status: Arc<Mutex<EngineStatus>>,
    chord_tx: broadcast::Sender<ChordEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    /// Monotonically increasing chord event sequence counter.
    seq: Arc<AtomicU64>,
    /// Shared pipeline counters.
    stats: Arc<pipeline::PerformanceStats>,
}

impl ChordEngine {
    /// Engine over the platform-default model store and the default
    /// guitar vocabulary. Does not load the model — call `initialize()`.
    pub fn new() -> Self {
        Self::with_store(ModelStore::default_location(), Arc::new(ChordVocabulary::default()))
    }

    pub fn with_store(store: ModelStore, vocabulary: Arc<ChordVocabulary>) -> Self {
        Self::with_classifier(ChordClassifier::new(store, vocabulary))
    }

    pub fn with_classifier(classifier: ChordClassifier) -> Self {
        let (chord_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config: Mutex::new(PipelineConfig::default()),
            classifier: Arc::new(Mutex::new(classifier)),
            attached: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            chord_tx,
            status_tx,
            activity_tx,
            seq: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(pipeline::PerformanceStats::default()),
        }
    }

    /// Validate the config and load (or build) the classification model.
    ///
    /// Idempotent for the model: re-initializing keeps the loaded weights
    /// and just re-applies the config.
    ///
    /// # Errors
    /// - `ChordError::AlreadyRunning` while processing is active.
    /// - `ChordError::InvalidConfig` on zero-valued config fields.
    pub fn initialize(&self, config: PipelineConfig) -> Result<ModelState> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ChordError::AlreadyRunning);
        }
        config.validate()?;

        self.set_status(EngineStatus::Initializing, None);
        info!(
            sample_rate = config.sample_rate,
            buffer_size = config.buffer_size,
            "initializing engine"
        );

        let state = match self.classifier.lock().initialize() {
            Ok(state) => state,
            Err(e) => {
                self.set_status(EngineStatus::Idle, Some(e.to_string()));
                return Err(e);
            }
        };

        *self.config.lock() = config;
        self.set_status(EngineStatus::Ready, None);
        info!(model_state = ?state, "engine ready");
        Ok(state)
    }

    /// Start audio capture and the pipeline.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns. The pipeline continues running in a background blocking
    /// thread; classification runs on a dedicated worker thread.
    ///
    /// # Errors
    /// - `ChordError::AlreadyRunning` if already started.
    /// - `ChordError::ClassifierNotInitialized` before `initialize()`.
    /// - `ChordError::NoDefaultInputDevice` / `ChordError::AudioStream` on device error.
    pub fn start_processing(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start processing using a preferred input device name.
    ///
    /// If `preferred_input_device` is `None`, default input selection is
    /// used. A session parked by `stop_processing()` still holds its device;
    /// restarting it ignores the preference and reuses that device.
    pub fn start_with_device(&self, preferred_input_device: Option<String>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ChordError::AlreadyRunning);
        }
        if !self.classifier.lock().is_initialized() {
            return Err(ChordError::ClassifierNotInitialized);
        }

        if self.attached.load(Ordering::SeqCst) {
            // Parked session: the device and pipeline thread are still
            // there, restart is a flag flip.
            self.running.store(true, Ordering::SeqCst);
            self.set_status(EngineStatus::Processing, None);
            info!("engine processing resumed");
            return Ok(());
        }

        self.stats.reset();
        self.attached.store(true, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self.set_status(EngineStatus::Processing, None);

        let (producer, consumer) = create_audio_ring();
        let (window_tx, window_rx) = crossbeam_channel::bounded(1);
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);

        // Classification worker; exits when the pipeline drops window_tx.
        let worker_classifier = Arc::clone(&self.classifier);
        let worker_stats = Arc::clone(&self.stats);
        std::thread::spawn(move || {
            pipeline::classification_worker(worker_classifier, window_rx, result_tx, worker_stats)
        });

        // Clone all Arc-wrapped state before moving into the closure.
        let config = self.config.lock().clone();
        let attached = Arc::clone(&self.attached);
        let running = Arc::clone(&self.running);
        let chord_tx = self.chord_tx.clone();
        let activity_tx = self.activity_tx.clone();
        let seq = Arc::clone(&self.seq);
        let stats = Arc::clone(&self.stats);

        // Sync oneshot: pipeline thread signals open success/failure back to
        // the caller. Carries the actual capture sample rate on success.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // Open audio device on THIS thread — cpal::Stream is !Send.
            let capture = match AudioCapture::open_with_preference(
                producer,
                Arc::clone(&running),
                preferred_input_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    attached.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let capture_sample_rate = capture.sample_rate;

            pipeline::run(pipeline::PipelineContext {
                config,
                consumer,
                attached: Arc::clone(&attached),
                running,
                chord_tx,
                activity_tx,
                seq,
                capture_sample_rate,
                stats,
                window_tx,
                result_rx,
            });

            // Only reached once the session is over (dispose, or a dead
            // worker). Stream drops here, releasing the audio device on
            // this thread.
            attached.store(false, Ordering::SeqCst);
            drop(capture);
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(capture_sample_rate = rate, "engine processing");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.attached.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.attached.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("pipeline failed to start".into()));
                Err(ChordError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Stop processing; the capture device stays attached and the model
    /// stays loaded, so `start_processing()` restarts cheaply. Only
    /// `dispose()` releases the device.
    ///
    /// # Errors
    /// - `ChordError::NotRunning` if not currently processing.
    pub fn stop_processing(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ChordError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Ready, None);
        info!("engine stop requested — capture session parked");
        Ok(())
    }

    /// Full teardown. Ends the capture session (releasing the audio
    /// device), clears the classifier, broadcasts `Stopped` for the session
    /// that ended, then settles back to `Idle`. The engine must be
    /// re-initialized before it can process again. Safe to call repeatedly.
    pub fn dispose(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let was_attached = self.attached.swap(false, Ordering::SeqCst);
        if was_running || was_attached {
            info!("dispose — releasing capture session");
            self.set_status(EngineStatus::Stopped, None);
        }
        self.classifier.lock().clear();
        self.set_status(EngineStatus::Idle, None);
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// State of the classification model (placeholder vs persisted key).
    pub fn model_state(&self) -> ModelState {
        self.classifier.lock().model_state().clone()
    }

    /// Subscribe to per-chunk chord events.
    pub fn subscribe_chords(&self) -> broadcast::Receiver<ChordEvent> {
        self.chord_tx.subscribe()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to live input activity events (RMS + gate decision).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn performance_stats(&self) -> pipeline::StatsSnapshot {
        self.stats.snapshot()
    }

    // ── Model management ─────────────────────────────────────────────────

    /// Fit the model on a labelled WAV dataset (one subdirectory per label).
    /// Holds the model lock for the whole run; never call while processing.
    pub fn train_from_directory(
        &self,
        root: &Path,
        epochs: usize,
        learning_rate: f32,
    ) -> Result<TrainingReport> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ChordError::AlreadyRunning);
        }
        let classifier = self.classifier.lock();
        let examples = dataset::load_dataset(
            root,
            classifier.vocabulary(),
            self.config.lock().buffer_size,
        )?;
        classifier.train(&examples, epochs, learning_rate)
    }

    /// Persist the current model weights; returns the generated key.
    pub fn save_model(&self) -> Result<String> {
        self.classifier.lock().save()
    }

    /// Current weights as a JSON string, for host-side export.
    pub fn export_model_json(&self) -> Result<String> {
        self.classifier.lock().export_json()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Default for ChordEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine(name: &str) -> (ChordEngine, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("chordsense-engine-{name}"));
        let engine = ChordEngine::with_store(
            ModelStore::new(dir.clone()),
            Arc::new(ChordVocabulary::default()),
        );
        (engine, dir)
    }

    #[test]
    fn config_validation_rejects_zero_fields() {
        let cfg = PipelineConfig {
            sample_rate: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ChordError::InvalidConfig(_))
        ));

        let cfg = PipelineConfig {
            buffer_size: 0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());

        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn config_serializes_camel_case() {
        let json = serde_json::to_string(&PipelineConfig::default()).unwrap();
        assert!(json.contains("\"sampleRate\":44100"));
        assert!(json.contains("\"bufferSize\":1024"));
        assert!(json.contains("\"echoCancellation\":true"));
    }

    #[test]
    fn initialize_moves_idle_to_ready() {
        let (engine, dir) = test_engine("init");
        assert_eq!(engine.status(), EngineStatus::Idle);

        let state = engine.initialize(PipelineConfig::default()).unwrap();
        assert_eq!(engine.status(), EngineStatus::Ready);
        assert!(matches!(
            state,
            ModelState::PlaceholderBuilt | ModelState::Loaded { .. }
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn initialize_rejects_invalid_config_and_stays_idle() {
        let (engine, dir) = test_engine("badcfg");
        let cfg = PipelineConfig {
            channels: 0,
            ..PipelineConfig::default()
        };
        assert!(engine.initialize(cfg).is_err());
        assert_eq!(engine.status(), EngineStatus::Idle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn initialize_emits_status_events() {
        let (engine, dir) = test_engine("events");
        let mut rx = engine.subscribe_status();

        engine.initialize(PipelineConfig::default()).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.status, EngineStatus::Initializing);
        assert_eq!(second.status, EngineStatus::Ready);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let (engine, dir) = test_engine("stop");
        assert!(matches!(
            engine.stop_processing(),
            Err(ChordError::NotRunning)
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn start_before_initialize_is_an_error() {
        let (engine, dir) = test_engine("nostart");
        assert!(matches!(
            engine.start_processing(),
            Err(ChordError::ClassifierNotInitialized)
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn dispose_is_idempotent() {
        let (engine, dir) = test_engine("dispose");
        engine.initialize(PipelineConfig::default()).unwrap();
        engine.dispose();
        engine.dispose();
        assert_eq!(engine.status(), EngineStatus::Idle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn dispose_clears_the_classifier() {
        let (engine, dir) = test_engine("disposeclear");
        engine.initialize(PipelineConfig::default()).unwrap();
        engine.dispose();

        // A disposed engine holds no model and cannot jump straight to
        // processing; it has to be re-initialized first.
        assert_eq!(engine.model_state(), ModelState::Uninitialized);
        assert!(matches!(
            engine.start_processing(),
            Err(ChordError::ClassifierNotInitialized)
        ));

        engine.initialize(PipelineConfig::default()).unwrap();
        assert_eq!(engine.status(), EngineStatus::Ready);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn stats_snapshot_starts_zeroed() {
        let (engine, dir) = test_engine("stats");
        let snap = engine.performance_stats();
        assert_eq!(snap.chunks_processed, 0);
        assert_eq!(snap.dropped_frames, 0);
        assert_eq!(snap.average_latency_ms, 0.0);
        let _ = std::fs::remove_dir_all(dir);
    }
}
