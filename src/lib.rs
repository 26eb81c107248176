//! # chordsense-core
//!
//! Reusable real-time chord-detection engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Pipeline(spawn_blocking)
//!                                                    │
//!                                         frame metrics + quality gate
//!                                                    │
//!                                    3-chunk window → classify worker
//!                                                    │
//!                                          broadcast::Sender<ChordEvent>
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens in the pipeline
//! thread; feature extraction and model inference run on a dedicated
//! classification worker so the per-chunk path never blocks on the model.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod classify;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod model;

// Convenience re-exports for downstream crates
pub use classify::{ChordClassifier, ChordVocabulary};
pub use engine::{ChordEngine, PipelineConfig};
pub use error::ChordError;
pub use ipc::events::{
    AudioActivityEvent, ChordEvent, ClassificationResult, EngineStatus, EngineStatusEvent,
    QualityMetrics,
};
pub use model::{ChordModel, ModelHandle, ModelLifecycle, ModelState};
