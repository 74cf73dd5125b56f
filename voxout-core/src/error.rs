use thiserror::Error;

/// All errors produced by voxout-core.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoOutputDevice,

    #[error("device offers no 16-bit or float output near {sample_rate} Hz")]
    UnsupportedFormat { sample_rate: u32 },

    #[error("playback engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SinkError>;
