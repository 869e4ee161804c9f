use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceGatewayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Resampler error: {0}")]
    Resampler(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoiceGatewayError>;
