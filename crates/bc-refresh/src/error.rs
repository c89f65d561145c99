/// Errors from the token refresh scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token refresh failed: {0}")]
    Auth(#[from] bc_auth::Error),

    #[error("token refresh gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("refresh task ended abnormally: {0}")]
    Task(String),
}

/// Result alias for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;
