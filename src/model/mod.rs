//! Model abstraction and lifecycle management.
//!
//! `ChordModel` decouples the pipeline from any specific backend; `&mut
//! self` on `predict` expresses that backends may be stateful, and all
//! mutation is serialised through `ModelHandle`'s `parking_lot::Mutex`.
//!
//! `ModelLifecycle` owns the load-or-build state machine:
//!
//! ```text
//! Uninitialized ── load persisted ──────────────► Loaded { key }
//!       │ miss/corrupt
//!       ├── fetch remote (feature "remote-models") ► Loaded { key }
//!       │ miss
//!       └── build placeholder ────────────────────► PlaceholderBuilt
//! ```
//!
//! A placeholder-built model is fully operable — predictions are just close
//! to uniform, which downstream reports as "unknown".

pub mod dataset;
pub mod network;
pub mod store;

pub use network::{ChromaNet, ModelWeights, TrainingExample, TrainingReport};
pub use store::ModelStore;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::classify::ChordVocabulary;
use crate::dsp::chroma::{Chromagram, BIN_COUNT};
use crate::error::{ChordError, Result};

/// Contract for chord classification backends.
pub trait ChordModel: Send + 'static {
    /// One-time warm-up: run a dummy inference so first-classification
    /// latency is paid at initialization, not mid-session.
    fn warm_up(&mut self) -> Result<()>;

    /// Probability vector over the vocabulary, in vocabulary order.
    /// Always sums to ~1.0 regardless of training state.
    fn predict(&mut self, chromagram: &Chromagram) -> Result<Vec<f32>>;

    /// Reset any internal decoder state.
    fn reset(&mut self);
}

impl ChordModel for ChromaNet {
    fn warm_up(&mut self) -> Result<()> {
        let dummy = Chromagram {
            frames: vec![[0.0; BIN_COUNT]],
            sample_rate: 44_100,
        };
        ChromaNet::predict(self, &dummy)?;
        Ok(())
    }

    fn predict(&mut self, chromagram: &Chromagram) -> Result<Vec<f32>> {
        ChromaNet::predict(self, chromagram)
    }

    fn reset(&mut self) {}
}

/// Thread-safe reference-counted handle to any `ChordModel` implementor.
///
/// Uses `parking_lot::Mutex` for non-poisoning on panic and a faster
/// uncontended lock than `std::sync::Mutex`.
#[derive(Clone)]
pub struct ModelHandle(pub Arc<Mutex<dyn ChordModel>>);

impl ModelHandle {
    /// Wrap any `ChordModel` in a `ModelHandle`.
    pub fn new<M: ChordModel>(model: M) -> Self {
        Self(Arc::new(Mutex::new(model)))
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}

/// Where the active model came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    /// No model yet — `load_or_build()` not called.
    Uninitialized,
    /// Weights loaded from the store (or fetched and persisted).
    Loaded { key: String },
    /// Untrained placeholder built after every load leg missed.
    PlaceholderBuilt,
}

/// Loads a persisted model, falls back to a placeholder, and owns
/// save/train/export. The same mutex guards live inference and training, so
/// `train()` can never run concurrently with `classify()` on one instance.
pub struct ModelLifecycle {
    store: ModelStore,
    remote_url: Option<String>,
    vocabulary: Arc<ChordVocabulary>,
    state: ModelState,
    model: Option<Arc<Mutex<ChromaNet>>>,
}

impl ModelLifecycle {
    pub fn new(store: ModelStore, vocabulary: Arc<ChordVocabulary>) -> Self {
        Self {
            store,
            remote_url: None,
            vocabulary,
            state: ModelState::Uninitialized,
            model: None,
        }
    }

    /// Configure the remote fallback leg. Only consulted when the local
    /// store misses and the `remote-models` feature is enabled.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// Handle to the active model, if one exists.
    pub fn handle(&self) -> Option<ModelHandle> {
        self.model.clone().map(|arc| {
            let dyn_arc: Arc<Mutex<dyn ChordModel>> = arc;
            ModelHandle(dyn_arc)
        })
    }

    /// Run the fallback chain and return a handle to the resulting model.
    ///
    /// Idempotent: a second call returns the existing model untouched.
    /// Load failures are recovered internally — this only errors if even
    /// the placeholder cannot be built, which cannot happen in practice.
    pub fn load_or_build(&mut self) -> Result<ModelHandle> {
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }

        let net = match self.try_load_local() {
            Some((key, net)) => {
                info!(key, "loaded persisted model");
                self.state = ModelState::Loaded { key };
                net
            }
            None => match self.try_fetch_remote() {
                Some((key, net)) => {
                    info!(key, "fetched remote model");
                    self.state = ModelState::Loaded { key };
                    net
                }
                None => {
                    info!("no persisted or remote model — building placeholder");
                    self.state = ModelState::PlaceholderBuilt;
                    ChromaNet::placeholder(self.vocabulary.labels().to_vec())
                }
            },
        };

        self.model = Some(Arc::new(Mutex::new(net)));
        self.handle().ok_or_else(|| {
            ChordError::ModelLoad("model handle unavailable after build".into())
        })
    }

    fn try_load_local(&self) -> Option<(String, ChromaNet)> {
        let (key, weights) = match self.store.load_latest() {
            Ok(found) => found?,
            Err(e) => {
                warn!(error = %e, "model store unreadable");
                return None;
            }
        };
        self.rehydrate(weights).map(|net| (key, net))
    }

    #[cfg(feature = "remote-models")]
    fn try_fetch_remote(&self) -> Option<(String, ChromaNet)> {
        let url = self.remote_url.as_deref()?;
        let weights = match store::fetch_remote(url) {
            Ok(w) => w,
            Err(e) => {
                warn!(url, error = %e, "remote model fetch failed");
                return None;
            }
        };
        let net = self.rehydrate(weights)?;
        // Persist the fetched weights so the next start loads locally.
        let key = ModelStore::generate_key();
        if let Err(e) = self.store.save(&key, &net.to_weights()) {
            warn!(error = %e, "could not persist fetched model");
        }
        Some((key, net))
    }

    #[cfg(not(feature = "remote-models"))]
    fn try_fetch_remote(&self) -> Option<(String, ChromaNet)> {
        if self.remote_url.is_some() {
            warn!("remote model url set but the remote-models feature is disabled");
        }
        None
    }

    fn rehydrate(&self, weights: ModelWeights) -> Option<ChromaNet> {
        if weights.vocabulary != self.vocabulary.labels() {
            warn!("persisted vocabulary does not match configured vocabulary");
            return None;
        }
        match ChromaNet::from_weights(weights) {
            Ok(net) => Some(net),
            Err(e) => {
                warn!(error = %e, "weight blob rejected");
                None
            }
        }
    }

    /// Drop the active model and return to `Uninitialized`. The next
    /// `load_or_build()` runs the full fallback chain again.
    pub fn clear(&mut self) {
        self.model = None;
        self.state = ModelState::Uninitialized;
    }

    /// Persist the current weights under a generated key; returns the key.
    pub fn save(&mut self) -> Result<String> {
        let model = self
            .model
            .as_ref()
            .ok_or(ChordError::ClassifierNotInitialized)?;
        let weights = model.lock().to_weights();
        let key = ModelStore::generate_key();
        self.store.save(&key, &weights)?;
        self.state = ModelState::Loaded { key: key.clone() };
        Ok(key)
    }

    /// Offline batch training. Holds the model lock for the duration, so a
    /// concurrent `classify()` blocks rather than observing torn weights.
    pub fn train(
        &self,
        examples: &[TrainingExample],
        epochs: usize,
        learning_rate: f32,
    ) -> Result<TrainingReport> {
        let model = self
            .model
            .as_ref()
            .ok_or(ChordError::ClassifierNotInitialized)?;
        let mut net = model.lock();
        net.train(examples, epochs, learning_rate)
    }

    /// Current weights as a portable JSON string.
    pub fn export_json(&self) -> Result<String> {
        let model = self
            .model
            .as_ref()
            .ok_or(ChordError::ClassifierNotInitialized)?;
        let weights = model.lock().to_weights();
        serde_json::to_string(&weights)
            .map_err(|e| ChordError::ModelLoad(format!("serialize weights: {e}")))
    }
}
