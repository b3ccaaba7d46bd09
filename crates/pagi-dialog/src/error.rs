//! Error types for the dialog orchestration core

use crate::session::SessionState;
use thiserror::Error;

/// Result type alias for dialog operations
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors raised by the session store, dispatcher and recognition layer
#[derive(Error, Debug)]
pub enum DialogError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },

    #[error("Dispatch of {event} aborted by session owner: {reason}")]
    DispatchAborted { event: String, reason: String },

    #[error("Unknown recognition engine: {0}")]
    UnknownEngine(String),

    #[error("No eligible recognition engine: {0}")]
    NoEligibleEngine(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Component error: {0}")]
    Component(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a single handler invocation during dispatch.
///
/// Argument errors stand in for a handler whose signature does not match the
/// event it was offered; they are logged and never stop the fan-out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("missing argument `{0}`")]
    MissingArgument(String),

    #[error("argument `{name}` is not a {expected}")]
    WrongArgumentType { name: String, expected: &'static str },

    #[error("rejected session transition: {0}")]
    Transition(String),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// True when the handler was offered arguments it cannot accept.
    pub fn is_signature_mismatch(&self) -> bool {
        matches!(
            self,
            HandlerError::MissingArgument(_) | HandlerError::WrongArgumentType { .. }
        )
    }

    /// Only a rejected session transition may abort a dispatch pass.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::Transition(_))
    }
}

impl From<DialogError> for HandlerError {
    fn from(err: DialogError) -> Self {
        match err {
            DialogError::InvalidTransition { .. } => HandlerError::Transition(err.to_string()),
            other => HandlerError::Failed(other.to_string()),
        }
    }
}

/// Result of one handler invocation
pub type HandlerResult = Result<(), HandlerError>;
