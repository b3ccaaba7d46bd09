//! Error types for the PAGI Voice backends

use pagi_dialog::DialogError;
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors raised by recognition backends and voice-activity detection
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("VAD processing error: {0}")]
    VadProcessing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ASR error: {0}")]
    Asr(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<VoiceError> for DialogError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::Config(msg) => DialogError::Config(msg),
            other => DialogError::Engine(other.to_string()),
        }
    }
}
