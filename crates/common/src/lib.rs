//! Shared types for the Business Central transport workspace
//!
//! Holds the pieces every crate needs but none owns: the redacting
//! [`Secret`] wrapper used for passwords, client secrets and bearer tokens,
//! and the configuration-level error type.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
