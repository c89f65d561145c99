//! Shared cache keys and OAuth defaults
//!
//! The two cache keys are part of the cross-process contract: every process
//! (API callers and the refresh worker) must agree on them, so they are fixed
//! rather than configurable.

/// Shared cache key holding the current bearer token.
pub const ACCESS_TOKEN_KEY: &str = "microsoft-bc-oauth2-access-token";

/// Shared cache key holding the delay (seconds) until the next scheduled refresh.
pub const NEXT_REFRESH_DELAY_KEY: &str = "next-job-time-for-oauth2-access-token";

/// Grant type used when the config does not name one.
pub const DEFAULT_GRANT_TYPE: &str = "client_credentials";
