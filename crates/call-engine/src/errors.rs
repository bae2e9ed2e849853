//! Call engine error types.
//!
//! Every error carries a bounded label for metrics and a client-safe
//! message for the UI. Internal details (URLs, transport reasons) are
//! logged but never returned by [`CallError::client_message`].

use std::time::Duration;
use thiserror::Error;

/// Coarse grouping of call errors, as published on the session error stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Could not reach any media server.
    Connection,
    /// The server refused or ended the call during setup.
    StartCall,
    /// Key exchange or control-message crypto failed.
    Encryption,
    /// The established session broke.
    Transport,
    /// Advisory about link quality; the call continues.
    Quality,
    /// Caller misuse or engine bug.
    Internal,
}

impl ErrorKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::StartCall => "start_call",
            ErrorKind::Encryption => "encryption",
            ErrorKind::Transport => "transport",
            ErrorKind::Quality => "quality",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Call engine error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Network failure on the last candidate URL.
    #[error("Connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    /// Call setup was refused, or the call parameters were unusable.
    #[error("Start call failed: {0}")]
    StartCall(String),

    /// The server rejected our credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Non-network failure while connecting.
    #[error("Server connection error: {0}")]
    ServerConnection(String),

    /// The start-call response did not arrive in time.
    #[error("Start call response timed out after {0:?}")]
    ResponseTimeout(Duration),

    /// The call was already over when we joined.
    #[error("Call has already ended")]
    CallEnded,

    /// Key exchange failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The connected session dropped for a non-local reason.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport gave up reconnecting.
    #[error("Reconnect failed")]
    ReconnectFailed,

    /// Local link quality is poor.
    #[error("Poor connection quality")]
    PoorConnection,

    /// Command not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Referenced room or participant does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Connection { .. } | CallError::ServerConnection(_) => ErrorKind::Connection,
            CallError::StartCall(_)
            | CallError::Unauthorized(_)
            | CallError::ResponseTimeout(_)
            | CallError::CallEnded => ErrorKind::StartCall,
            CallError::Encryption(_) => ErrorKind::Encryption,
            CallError::Transport(_) | CallError::ReconnectFailed => ErrorKind::Transport,
            CallError::PoorConnection => ErrorKind::Quality,
            CallError::InvalidState(_) | CallError::NotFound(_) | CallError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether another candidate URL may succeed where this one failed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Connection { .. })
    }

    /// Whether this error ends the session when raised by the controller.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CallError::PoorConnection | CallError::InvalidState(_) | CallError::NotFound(_)
        )
    }

    /// Returns a bounded label string for the error variant (for metrics).
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            CallError::Connection { .. } => "connection",
            CallError::StartCall(_) => "start_call",
            CallError::Unauthorized(_) => "unauthorized",
            CallError::ServerConnection(_) => "server_connection",
            CallError::ResponseTimeout(_) => "response_timeout",
            CallError::CallEnded => "call_ended",
            CallError::Encryption(_) => "encryption",
            CallError::Transport(_) => "transport",
            CallError::ReconnectFailed => "reconnect_failed",
            CallError::PoorConnection => "poor_connection",
            CallError::InvalidState(_) => "invalid_state",
            CallError::NotFound(_) => "not_found",
            CallError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CallError::Connection { .. } | CallError::ServerConnection(_) => {
                "Unable to reach the call server, please check your network".to_string()
            }
            CallError::StartCall(_) => "The call could not be started".to_string(),
            CallError::Unauthorized(_) => "You are not allowed to join this call".to_string(),
            CallError::ResponseTimeout(_) => "The call server did not respond".to_string(),
            CallError::CallEnded => "The call has ended".to_string(),
            CallError::Encryption(_) => "Unable to establish a secure call".to_string(),
            CallError::Transport(_) => "The call was disconnected".to_string(),
            CallError::ReconnectFailed => "Reconnection failed, the call has ended".to_string(),
            CallError::PoorConnection => "Your network connection is unstable".to_string(),
            CallError::InvalidState(_) | CallError::NotFound(_) | CallError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

/// Error event published on a session's error stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallErrorEvent {
    /// Coarse kind.
    pub kind: ErrorKind,
    /// Underlying error (detail for logs).
    pub error: CallError,
    /// Whether the session has been torn down.
    pub terminal: bool,
}

impl CallErrorEvent {
    /// Build an event for `error`.
    #[must_use]
    pub fn new(error: CallError, terminal: bool) -> Self {
        Self {
            kind: error.kind(),
            error,
            terminal,
        }
    }
}
