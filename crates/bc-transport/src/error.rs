//! Error taxonomy for dispatched requests
//!
//! Only the terminal, classified error reaches the caller; retries are
//! exhausted internally. Configuration errors are raised before anything is
//! sent and are never retried.

use std::time::Duration;

/// Errors surfaced by the request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller or construction mistake (missing primary key, no company).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Upstream or network failure. `status` is absent when no response arrived.
    #[error("{message}")]
    Transport {
        message: String,
        status: Option<u16>,
        data: Option<serde_json::Value>,
    },

    /// HTTP 429 after the retry budget. The pipeline does not honour
    /// `retry_after` itself; callers back off externally.
    #[error("{message}")]
    RateLimit {
        message: String,
        retry_after: Option<String>,
    },

    /// The call exceeded the configured per-request timeout on every attempt.
    #[error("{message} (limit {}s)", limit.as_secs_f64())]
    Timeout { message: String, limit: Duration },

    /// The response body did not match the caller's type.
    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("authentication setup failed: {0}")]
    Auth(#[from] bc_auth::Error),
}

impl Error {
    /// HTTP-ish status for logging: upstream status, 429, or 408.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            Error::RateLimit { .. } => Some(429),
            Error::Timeout { .. } => Some(408),
            Error::Configuration(_) => Some(400),
            Error::Decode(_) | Error::Auth(_) => None,
        }
    }

    /// Label for the `error_type` metric dimension.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Transport { status: None, .. } => "connection",
            Error::Transport { .. } => "upstream",
            Error::RateLimit { .. } => "rate_limit",
            Error::Timeout { .. } => "timeout",
            Error::Decode(_) => "decode",
            Error::Auth(_) => "auth",
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
