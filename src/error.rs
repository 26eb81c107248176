use thiserror::Error;

/// All errors produced by chordsense-core.
#[derive(Debug, Error)]
pub enum ChordError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("ring buffer is full — pipeline cannot keep up")]
    RingBufferFull,

    #[error("classifier is not initialized — call initialize() first")]
    ClassifierNotInitialized,

    #[error("inference error: {0}")]
    Inference(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("model load error: {0}")]
    ModelLoad(String),

    #[error("model fetch error: {0}")]
    ModelFetch(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChordError>;
