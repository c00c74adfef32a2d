use thiserror::Error;

/// All errors produced by sonoflux-core.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("audio host initialization failed: {0}")]
    AudioInit(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("audio device enumeration failed: {0}")]
    AudioDevices(String),

    #[error("no usable input device (requested index {index}, use_default={use_default})")]
    NoInputDevice { index: i32, use_default: bool },

    #[error("fft size must be a power of two, got {size}")]
    FftInvalidSize { size: usize },

    #[error("actor with id '{id}' already registered")]
    ActorDuplicate { id: String },

    #[error("actor with id '{id}' not found")]
    ActorNotFound { id: String },

    #[error("actor closed or stopping")]
    ActorClosed,

    #[error("actor mailbox full")]
    MailboxFull,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid lifecycle state: {0}")]
    InvalidState(String),

    #[error("shutdown errors occurred: {0}")]
    Shutdown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
