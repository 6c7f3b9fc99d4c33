use thiserror::Error;

/// Dashboard error types covering configuration, session, REST, and push failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DashboardError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Access token could not be decoded or has expired.
    #[error("session error: {0}")]
    Session(String),

    /// Backend answered with a non-success status.
    #[error("API error: {endpoint} returned {status}")]
    Api {
        /// Request path relative to the API base URL.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// Request never produced a response (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Push connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A required record is missing (no reading for a field, no fields at all).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid connection state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl From<serde_json::Error> for DashboardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Convenience type alias for dashboard operations.
pub type DashboardResult<T> = Result<T, DashboardError>;
