//! Authentication for the Business Central API
//!
//! Provides the closed set of authentication strategies (Basic, NTLM,
//! OAuth2), the OAuth2 client-credentials token lifecycle, and the shared
//! token store that carries tokens across processes.
//!
//! Token flow:
//! 1. `OAuth2Client::get_access_token()` reads the shared store
//! 2. On a miss it calls `token::request_token()` and writes the result back
//!    with TTL = `expires_in`
//! 3. `AuthenticatedClient` attaches the last token this process saw
//! 4. The refresh worker calls `OAuth2Client::fetch_token()` on a schedule so
//!    step 2 rarely happens on the request path

pub mod constants;
pub mod error;
pub mod oauth2;
pub mod store;
pub mod strategy;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use oauth2::OAuth2Client;
pub use store::{CachedValue, FileTokenStore, MemoryTokenStore, StoreFuture, TokenStore};
pub use strategy::{
    AuthConfig, AuthStrategy, AuthenticatedClient, BasicCredentials, ClientSettings,
    NtlmCredentials,
};
pub use token::{OAuth2Config, Token, TokenResponse, request_token};
