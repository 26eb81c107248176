//! Named-blob persistence for model weights.
//!
//! Weights are JSON files under a root directory, one file per key. The key
//! format (`chord-model-<unix-millis>`) sorts lexicographically by creation
//! time, so "latest" is just the largest key.
//!
//! Root resolution order: explicit path → `CHORDSENSE_MODEL_DIR` →
//! platform data dir.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::{ChordError, Result};
use crate::model::network::ModelWeights;

/// File-backed model weight store.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store rooted at the default models directory.
    pub fn default_location() -> Self {
        Self::new(default_models_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generate a fresh persistence key.
    pub fn generate_key() -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("chord-model-{millis}")
    }

    /// Persist weights under `key`. Creates the root directory on demand.
    pub fn save(&self, key: &str, weights: &ModelWeights) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(key);
        let json = serde_json::to_string(weights)
            .map_err(|e| ChordError::ModelLoad(format!("serialize weights: {e}")))?;
        fs::write(&path, json)?;
        debug!(key, path = %path.display(), "model weights saved");
        Ok(())
    }

    /// Load weights stored under `key`.
    pub fn load(&self, key: &str) -> Result<ModelWeights> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(ChordError::ModelNotFound { path });
        }
        let raw = fs::read_to_string(&path)?;
        parse_weights(&raw)
    }

    /// Load the most recently saved weights, if any exist.
    ///
    /// A corrupt blob is skipped with a warning rather than failing the
    /// whole load — older intact blobs still count.
    pub fn load_latest(&self) -> Result<Option<(String, ModelWeights)>> {
        let mut keys = self.list_keys()?;
        keys.sort();
        while let Some(key) = keys.pop() {
            match self.load(&key) {
                Ok(weights) => return Ok(Some((key, weights))),
                Err(e) => {
                    warn!(key, error = %e, "skipping unreadable model blob");
                }
            }
        }
        Ok(None)
    }

    /// All persisted keys, unordered.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_json = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if is_json {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

/// Parse a weight blob from any reader (file, embedded bytes, HTTP body).
pub fn read_weights(mut reader: impl Read) -> Result<ModelWeights> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;
    parse_weights(&raw)
}

fn parse_weights(raw: &str) -> Result<ModelWeights> {
    serde_json::from_str(raw).map_err(|e| ChordError::ModelLoad(format!("parse weights: {e}")))
}

/// Fetch a weight blob from a remote URL (the middle leg of the lifecycle
/// fallback chain).
#[cfg(feature = "remote-models")]
pub fn fetch_remote(url: &str) -> Result<ModelWeights> {
    let response = reqwest::blocking::get(url)
        .map_err(|e| ChordError::ModelFetch(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(ChordError::ModelFetch(format!(
            "{url}: HTTP {}",
            response.status()
        )));
    }
    response
        .json::<ModelWeights>()
        .map_err(|e| ChordError::ModelFetch(format!("{url}: {e}")))
}

/// Default models directory.
pub fn default_models_dir() -> PathBuf {
    if let Some(explicit) = std::env::var_os("CHORDSENSE_MODEL_DIR") {
        let p = PathBuf::from(explicit);
        if !p.as_os_str().is_empty() {
            return p;
        }
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("ChordSense").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("chordsense")
            .join("models")
    }
}
