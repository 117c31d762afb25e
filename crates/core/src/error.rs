//! Error taxonomy for the call session lifecycle.

use thiserror::Error;

/// Every failure the session lifecycle can surface to a user.
///
/// None of these are fatal to the process: a session that ends in `Failed`
/// can always be retried by starting a new one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Bad input, e.g. an empty agent id. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The API credential was rejected. Requires operator intervention.
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// Media/connection failure on the realtime transport.
    #[error("Transport error: {0}")]
    Transport(String),
    /// A single poller tick failed; retried on the next tick.
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Service error: {0}")]
    Service(String),
    #[error("session already in progress")]
    SessionInProgress,
    #[error("cancelled")]
    Cancelled,
}

impl CallError {
    /// The human-readable reason shown to the user, without the category prefix.
    pub fn reason(&self) -> String {
        match self {
            CallError::Validation(msg)
            | CallError::Auth(msg)
            | CallError::Transport(msg)
            | CallError::TransientFetch(msg)
            | CallError::NotFound(msg)
            | CallError::Service(msg) => msg.clone(),
            CallError::SessionInProgress | CallError::Cancelled => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CallError::Service(format!("malformed response: {}", err))
        } else {
            CallError::Service(err.to_string())
        }
    }
}
