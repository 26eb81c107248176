//! Chord classification: model ownership, decision policy, training entry.
//!
//! The classifier wraps `ModelLifecycle` and applies the decision policy on
//! top of the raw probability vector: arg-max selects the candidate, but a
//! probability below `MIN_CONFIDENCE` or a sentinel win is collapsed into
//! the externally observable `"unknown"` outcome with confidence 0.

pub mod vocabulary;

pub use vocabulary::{ChordVocabulary, NO_CHORD, UNKNOWN};

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::dsp::chroma::Chromagram;
use crate::error::{ChordError, Result};
use crate::ipc::events::{ChordProbability, ClassificationResult};
use crate::model::{ModelHandle, ModelLifecycle, ModelState, ModelStore, TrainingExample, TrainingReport};

/// Arg-max probabilities below this are reported as "unknown".
/// A tunable constant, not a structural invariant.
pub const MIN_CONFIDENCE: f32 = 0.3;

/// Owns the inference model and maps chromagrams to classification results.
pub struct ChordClassifier {
    vocabulary: Arc<ChordVocabulary>,
    lifecycle: ModelLifecycle,
    handle: Option<ModelHandle>,
}

impl ChordClassifier {
    pub fn new(store: ModelStore, vocabulary: Arc<ChordVocabulary>) -> Self {
        let lifecycle = ModelLifecycle::new(store, Arc::clone(&vocabulary));
        Self {
            vocabulary,
            lifecycle,
            handle: None,
        }
    }

    /// Classifier over an externally constructed lifecycle (e.g. one with a
    /// remote fallback URL configured).
    pub fn with_lifecycle(lifecycle: ModelLifecycle, vocabulary: Arc<ChordVocabulary>) -> Self {
        Self {
            vocabulary,
            lifecycle,
            handle: None,
        }
    }

    pub fn vocabulary(&self) -> &Arc<ChordVocabulary> {
        &self.vocabulary
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    pub fn model_state(&self) -> &ModelState {
        self.lifecycle.state()
    }

    /// Load or build the model and warm it up.
    ///
    /// Idempotent: calling on an already-initialized classifier neither
    /// reallocates the model nor resets weights — it just reports the
    /// current state.
    pub fn initialize(&mut self) -> Result<ModelState> {
        if self.handle.is_none() {
            let handle = self.lifecycle.load_or_build()?;
            handle.0.lock().warm_up()?;
            self.handle = Some(handle);
            debug!(state = ?self.lifecycle.state(), "classifier initialized");
        }
        Ok(self.lifecycle.state().clone())
    }

    /// Drop the model entirely. `initialize()` must run again before any
    /// classification or training.
    pub fn clear(&mut self) {
        self.handle = None;
        self.lifecycle.clear();
    }

    /// Handle to the active model (shared with the classification worker).
    pub fn model_handle(&self) -> Result<ModelHandle> {
        self.handle
            .clone()
            .ok_or(ChordError::ClassifierNotInitialized)
    }

    /// Run forward inference and apply the decision policy.
    ///
    /// Errors if called before `initialize()`.
    pub fn classify(
        &self,
        chromagram: &Chromagram,
        timestamp_ms: u64,
    ) -> Result<ClassificationResult> {
        let handle = self
            .handle
            .as_ref()
            .ok_or(ChordError::ClassifierNotInitialized)?;

        let started = Instant::now();
        let probs = handle.0.lock().predict(chromagram)?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if probs.len() != self.vocabulary.len() {
            return Err(ChordError::Inference(format!(
                "model produced {} probabilities for a vocabulary of {}",
                probs.len(),
                self.vocabulary.len()
            )));
        }

        let (label, confidence) = interpret_prediction(&probs, &self.vocabulary);
        let probabilities = self
            .vocabulary
            .labels()
            .iter()
            .zip(&probs)
            .map(|(l, &p)| ChordProbability {
                label: l.clone(),
                probability: p,
            })
            .collect();

        Ok(ClassificationResult {
            label,
            confidence,
            probabilities,
            timestamp_ms,
            latency_ms,
        })
    }

    /// Supervised fit. Never call from the audio path — the model lock is
    /// held for the whole run, stalling any concurrent `classify()`.
    pub fn train(
        &self,
        examples: &[TrainingExample],
        epochs: usize,
        learning_rate: f32,
    ) -> Result<TrainingReport> {
        if self.handle.is_none() {
            return Err(ChordError::ClassifierNotInitialized);
        }
        self.lifecycle.train(examples, epochs, learning_rate)
    }

    /// Persist the current weights; returns the generated key.
    pub fn save(&mut self) -> Result<String> {
        self.lifecycle.save()
    }

    /// Current weights as a portable JSON string.
    pub fn export_json(&self) -> Result<String> {
        self.lifecycle.export_json()
    }
}

/// Decision policy over a raw probability vector.
fn interpret_prediction(probs: &[f32], vocabulary: &ChordVocabulary) -> (String, f32) {
    let Some((best_index, &best_prob)) = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    else {
        return (UNKNOWN.to_string(), 0.0);
    };

    if best_prob < MIN_CONFIDENCE || vocabulary.is_sentinel(best_index) {
        return (UNKNOWN.to_string(), 0.0);
    }

    let label = vocabulary
        .label(best_index)
        .unwrap_or(UNKNOWN)
        .to_string();
    (label, best_prob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::chroma::BIN_COUNT;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "chordsense-classify-test-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn classifier(tag: &str) -> ChordClassifier {
        ChordClassifier::new(
            ModelStore::new(temp_root(tag)),
            Arc::new(ChordVocabulary::default()),
        )
    }

    fn chroma_with_bin(bin: usize) -> Chromagram {
        let mut frame = [0.0f32; BIN_COUNT];
        frame[bin] = 1.0;
        Chromagram {
            frames: vec![frame; 3],
            sample_rate: 44_100,
        }
    }

    #[test]
    fn classify_before_initialize_is_an_error() {
        let clf = classifier("uninit");
        assert!(matches!(
            clf.classify(&chroma_with_bin(0), 0),
            Err(ChordError::ClassifierNotInitialized)
        ));
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut clf = classifier("idem");
        clf.initialize().unwrap();
        let first = clf.model_handle().unwrap();
        clf.initialize().unwrap();
        let second = clf.model_handle().unwrap();
        assert!(Arc::ptr_eq(&first.0, &second.0));
    }

    #[test]
    fn clear_requires_reinitialization() {
        let mut clf = classifier("clear");
        clf.initialize().unwrap();
        assert!(clf.is_initialized());

        clf.clear();
        assert!(!clf.is_initialized());
        assert_eq!(*clf.model_state(), ModelState::Uninitialized);
        assert!(matches!(
            clf.classify(&chroma_with_bin(0), 0),
            Err(ChordError::ClassifierNotInitialized)
        ));

        clf.initialize().unwrap();
        assert!(clf.classify(&chroma_with_bin(0), 0).is_ok());
    }

    #[test]
    fn probabilities_always_sum_to_one() {
        let mut clf = classifier("sums");
        clf.initialize().unwrap();
        let result = clf.classify(&chroma_with_bin(4), 100).unwrap();
        let sum: f32 = result.probabilities.iter().map(|p| p.probability).sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum={sum}");
        assert_eq!(
            result.probabilities.len(),
            ChordVocabulary::default().len()
        );
        assert_eq!(result.timestamp_ms, 100);
    }

    #[test]
    fn placeholder_predictions_collapse_to_unknown() {
        // A 23-class untrained network is near uniform — always < 0.3.
        let mut clf = classifier("unknown");
        clf.initialize().unwrap();
        let result = clf.classify(&chroma_with_bin(9), 0).unwrap();
        assert_eq!(result.label, UNKNOWN);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn low_confidence_is_forced_to_unknown() {
        let vocab = ChordVocabulary::default();
        let mut probs = vec![0.0f32; vocab.len()];
        probs[0] = 0.29;
        let (label, confidence) = interpret_prediction(&probs, &vocab);
        assert_eq!(label, UNKNOWN);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn confident_prediction_keeps_its_label() {
        let vocab = ChordVocabulary::default();
        let am = vocab.index_of("Am").unwrap();
        let mut probs = vec![0.0f32; vocab.len()];
        probs[am] = 0.8;
        let (label, confidence) = interpret_prediction(&probs, &vocab);
        assert_eq!(label, "Am");
        assert!((confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn sentinel_win_is_reported_as_unknown_even_when_confident() {
        let vocab = ChordVocabulary::default();
        let sentinel = vocab.index_of(NO_CHORD).unwrap();
        let mut probs = vec![0.0f32; vocab.len()];
        probs[sentinel] = 0.95;
        let (label, confidence) = interpret_prediction(&probs, &vocab);
        assert_eq!(label, UNKNOWN);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn boundary_confidence_is_kept() {
        let vocab = ChordVocabulary::default();
        let mut probs = vec![0.0f32; vocab.len()];
        probs[2] = 0.3;
        let (label, confidence) = interpret_prediction(&probs, &vocab);
        assert_eq!(label, vocab.label(2).unwrap());
        assert!((confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn trained_classifier_recognizes_its_training_input() {
        let mut clf = classifier("trained");
        clf.initialize().unwrap();

        let vocab = Arc::clone(clf.vocabulary());
        let a_index = vocab.index_of("A").unwrap();
        let e_index = vocab.index_of("E").unwrap();
        let examples = vec![
            TrainingExample {
                chromagram: chroma_with_bin(9),
                label_index: a_index,
            },
            TrainingExample {
                chromagram: chroma_with_bin(4),
                label_index: e_index,
            },
        ];
        clf.train(&examples, 300, 0.05).unwrap();

        let result = clf.classify(&chroma_with_bin(9), 0).unwrap();
        assert_eq!(result.label, "A", "probabilities: {:?}", result.probabilities);
        assert!(result.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn train_before_initialize_is_an_error() {
        let clf = classifier("trainfirst");
        let examples = vec![TrainingExample {
            chromagram: chroma_with_bin(0),
            label_index: 0,
        }];
        assert!(clf.train(&examples, 1, 0.01).is_err());
    }
}
