//! Background refresh of the shared OAuth2 access token
//!
//! Refresh lifecycle:
//! 1. `TokenRefreshScheduler::start()` reads the persisted delay (default 1s)
//! 2. When it elapses the job force-fetches a token and stores it
//! 3. The next delay (`expires_in - 10s`) is persisted and the job re-arms
//! 4. Failed firings back off exponentially; once the budget is spent the
//!    scheduler goes idle and `RefreshHandle::join` reports the error

pub mod error;
pub mod metrics;
pub mod policy;
pub mod scheduler;
pub mod state;

pub use error::{Error, Result};
pub use policy::RetryPolicy;
pub use scheduler::{JOB_NAME, RefreshHandle, TokenRefreshScheduler, initial_delay, next_delay};
pub use state::{RefreshAction, RefreshEvent, RefreshState, handle_event};
