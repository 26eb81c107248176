//! Event types emitted to engine consumers.
//!
//! ## Channels
//!
//! | Event | Purpose |
//! |-------|---------|
//! | `ChordEvent` | one record per processed chunk: metrics + optional classification |
//! | `EngineStatusEvent` | engine state transitions |
//! | `AudioActivityEvent` | per-chunk level meter feed |
//!
//! Consumers subscribe via `tokio::sync::broadcast`; a lagging consumer
//! loses old events rather than stalling the pipeline.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chord detection events
// ---------------------------------------------------------------------------

/// Emitted once per processed chunk.
///
/// `classification` is `None` when the quality gate rejected the chunk or
/// the accumulation window was not yet full — both normal, frequent states.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Capture timestamp, milliseconds since engine start.
    pub timestamp_ms: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
    /// Peak absolute amplitude of the chunk.
    pub peak: f32,
    /// True when the chunk was below the silence threshold.
    pub silent: bool,
    /// Per-chunk signal quality metrics.
    pub quality: QualityMetrics,
    /// Classification outcome, when one was attempted.
    pub classification: Option<ClassificationResult>,
}

/// Signal quality derived per chunk. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    /// Signal-to-noise ratio in dB; 0 when signal power is 0.
    pub snr_db: f32,
    /// Fundamental-energy ratio in [0.0, 1.0].
    pub clarity: f32,
    /// Inverse coefficient of variation of sub-window RMS, in [0.0, 1.0].
    pub stability: f32,
}

/// One chord classification outcome.
///
/// A result with label `"unknown"` and confidence 0 is a valid, expected
/// outcome — not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// Chosen chord label, or `"unknown"`.
    pub label: String,
    /// Arg-max probability; forced to 0 below the confidence threshold.
    pub confidence: f32,
    /// Full probability map in vocabulary order.
    pub probabilities: Vec<ChordProbability>,
    /// Capture timestamp of the window tail, milliseconds since engine start.
    pub timestamp_ms: u64,
    /// Inference wall-clock time in milliseconds.
    pub latency_ms: f64,
}

/// One entry of the probability map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordProbability {
    pub label: String,
    pub probability: f32,
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted for each processed audio chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
    /// Whether the chunk passed the quality gate.
    pub gate_passed: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but not initialized.
    Idle,
    /// Acquiring the capture source and building the classifier.
    Initializing,
    /// Initialized and ready; capture device attached, no processing.
    Ready,
    /// Actively capturing and classifying.
    Processing,
    /// Active session torn down; broadcast during disposal.
    Stopped,
    /// Unrecoverable error — reinitialization required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chord_event_serializes_with_camel_case_fields() {
        let event = ChordEvent {
            seq: 7,
            timestamp_ms: 1_230,
            rms: 0.18,
            peak: 0.42,
            silent: false,
            quality: QualityMetrics {
                snr_db: 18.5,
                clarity: 0.7,
                stability: 0.9,
            },
            classification: Some(ClassificationResult {
                label: "Am".into(),
                confidence: 0.81,
                probabilities: vec![ChordProbability {
                    label: "Am".into(),
                    probability: 0.81,
                }],
                timestamp_ms: 1_230,
                latency_ms: 3.4,
            }),
        };

        let json = serde_json::to_value(&event).expect("serialize chord event");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["timestampMs"], 1_230);
        assert_eq!(json["quality"]["snrDb"].as_f64().expect("snrDb"), 18.5);
        assert_eq!(json["classification"]["label"], "Am");
        assert_eq!(
            json["classification"]["probabilities"][0]["probability"]
                .as_f64()
                .map(|p| (p - 0.81).abs() < 1e-5),
            Some(true)
        );

        let round_trip: ChordEvent =
            serde_json::from_value(json).expect("deserialize chord event");
        assert_eq!(round_trip.seq, 7);
        assert_eq!(
            round_trip.classification.expect("classification").label,
            "Am"
        );
    }

    #[test]
    fn gate_rejected_chunk_serializes_with_null_classification() {
        let event = ChordEvent {
            seq: 1,
            timestamp_ms: 23,
            rms: 0.001,
            peak: 0.002,
            silent: true,
            quality: QualityMetrics {
                snr_db: 0.0,
                clarity: 0.0,
                stability: 0.0,
            },
            classification: None,
        };

        let json = serde_json::to_value(&event).expect("serialize chord event");
        assert!(json["classification"].is_null());
        assert_eq!(json["silent"], true);
    }

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::Initializing,
            detail: Some("opening capture device".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "initializing");
        assert_eq!(json["detail"], "opening capture device");

        let round_trip: EngineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, EngineStatus::Initializing);
    }

    #[test]
    fn engine_status_rejects_non_lowercase_values() {
        let invalid = r#""Processing""#;
        let err = serde_json::from_str::<EngineStatus>(invalid);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn audio_activity_event_serializes_with_camel_case_fields() {
        let event = AudioActivityEvent {
            seq: 3,
            rms: 0.18,
            gate_passed: true,
        };

        let json = serde_json::to_value(&event).expect("serialize activity event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["gatePassed"], true);

        let round_trip: AudioActivityEvent =
            serde_json::from_value(json).expect("deserialize activity event");
        assert!(round_trip.gate_passed);
    }
}
