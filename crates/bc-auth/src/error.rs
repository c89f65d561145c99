//! Error types for authentication and token storage

/// Errors from authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("token store error: {0}")]
    Store(String),

    #[error("token store parse error: {0}")]
    StoreParse(String),

    #[error("unsupported authentication type: {0}")]
    UnsupportedAuthType(String),

    #[error("auth configuration error: {0}")]
    Config(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
