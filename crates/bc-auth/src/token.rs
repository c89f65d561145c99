//! OAuth2 client-credentials grant
//!
//! One token endpoint interaction: POST the client-credentials parameters
//! form-encoded and parse the `expires_in`-style response. Caching and the
//! in-memory copy live in [`crate::oauth2`]; this module only talks HTTP.

use chrono::{DateTime, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::DEFAULT_GRANT_TYPE;
use crate::error::{Error, Result};

/// OAuth2 client settings.
///
/// `client_secret` is never read from the config file; it is overlaid from
/// the environment by the process that loads configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuth2Config {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    pub scope: String,
    #[serde(default = "default_grant_type")]
    pub grant_type: String,
    /// Token endpoint, e.g. `https://login.microsoftonline.com/<tenant>/oauth2/v2.0/token`
    pub token_url: String,
}

fn default_grant_type() -> String {
    DEFAULT_GRANT_TYPE.to_string()
}

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub ext_expires_in: Option<u64>,
    pub access_token: String,
}

/// A bearer token as handed to callers.
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: Secret<String>,
    /// Seconds of validity left as of `fetched_at`.
    pub expires_in: u64,
    pub fetched_at: DateTime<Utc>,
}

impl Token {
    pub fn from_response(response: TokenResponse) -> Self {
        Self {
            access_token: Secret::new(response.access_token),
            expires_in: response.expires_in,
            fetched_at: Utc::now(),
        }
    }
}

/// Request a fresh token with the client-credentials grant.
///
/// 401/403 means the client id/secret pair was rejected and is reported as
/// `InvalidCredentials`; any other non-success status is a `TokenExchange`
/// failure carrying the status and body.
pub async fn request_token(
    client: &reqwest::Client,
    config: &OAuth2Config,
    client_secret: &Secret<String>,
) -> Result<TokenResponse> {
    debug!(token_url = %config.token_url, client_id = %config.client_id, "requesting access token");

    let response = client
        .post(&config.token_url)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", client_secret.expose().as_str()),
            ("scope", config.scope.as_str()),
            ("grant_type", config.grant_type.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "client credentials rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}
