//! OAuth2 bearer-token lifecycle
//!
//! [`OAuth2Client`] reads the current token from the shared [`TokenStore`]
//! and only calls the token endpoint when the store has nothing live. The
//! store's TTL is the sole validity check; there is no probe call.
//!
//! Known race: writing a new token is delete-then-set, not atomic. Two
//! processes starting cold at the same time may both fetch and both write.
//! Either token is valid, so the only cost is a redundant endpoint call.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use common::Secret;
use tracing::{debug, info};

use crate::constants::ACCESS_TOKEN_KEY;
use crate::error::{Error, Result};
use crate::store::TokenStore;
use crate::token::{self, OAuth2Config, Token};

/// Client-credentials OAuth2 client backed by a shared token store.
pub struct OAuth2Client {
    config: OAuth2Config,
    client_secret: Secret<String>,
    http: reqwest::Client,
    store: Arc<dyn TokenStore>,
    current: RwLock<Option<Secret<String>>>,
}

impl OAuth2Client {
    /// Build a client. Fails if the config carries no client secret.
    pub fn new(
        config: OAuth2Config,
        http: reqwest::Client,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let client_secret = config
            .client_secret
            .clone()
            .filter(|s| !s.is_blank())
            .ok_or_else(|| Error::Config("oauth2 client_secret is not set".into()))?;
        Ok(Self {
            config,
            client_secret,
            http,
            store,
            current: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Return the shared token, fetching one only if the store has none.
    pub async fn get_access_token(&self) -> Result<Token> {
        if let Some(cached) = self.store.get(ACCESS_TOKEN_KEY).await? {
            debug!("using cached access token");
            self.remember(&cached.value);
            return Ok(Token {
                access_token: Secret::new(cached.value),
                expires_in: cached.expires_in.map(|d| d.as_secs()).unwrap_or_default(),
                fetched_at: Utc::now(),
            });
        }
        self.fetch_token().await
    }

    /// Always hit the token endpoint, then overwrite the shared entry with
    /// TTL = `expires_in`.
    pub async fn fetch_token(&self) -> Result<Token> {
        let response = token::request_token(&self.http, &self.config, &self.client_secret).await?;
        let token = Token::from_response(response);
        let ttl = Duration::from_secs(token.expires_in);

        self.store.delete(ACCESS_TOKEN_KEY).await?;
        self.store
            .set(ACCESS_TOKEN_KEY, token.access_token.expose().clone(), ttl)
            .await?;
        self.remember(token.access_token.expose());

        info!(expires_in = token.expires_in, "fetched new access token");
        Ok(token)
    }

    /// Last token seen by this process, if any.
    ///
    /// Not authoritative: it is whatever `get_access_token`/`fetch_token`
    /// last observed and may have expired in the shared store since.
    pub fn current_token(&self) -> Option<Secret<String>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn remember(&self, access_token: &str) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Some(Secret::new(access_token.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth_config(token_url: String) -> OAuth2Config {
        OAuth2Config {
            client_id: "bc-client".into(),
            client_secret: Some(Secret::new("s3cret".into())),
            scope: "https://api.businesscentral.dynamics.com/.default".into(),
            grant_type: "client_credentials".into(),
            token_url,
        }
    }

    async fn token_server(access_token: &str, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": access_token
            })))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn missing_client_secret_is_config_error() {
        let mut cfg = oauth_config("https://login.example.com/token".into());
        cfg.client_secret = None;
        let result = OAuth2Client::new(
            cfg,
            reqwest::Client::new(),
            Arc::new(MemoryTokenStore::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn two_calls_within_ttl_hit_the_endpoint_once() {
        let server = token_server("at_once", 1).await;
        let client = OAuth2Client::new(
            oauth_config(format!("{}/token", server.uri())),
            reqwest::Client::new(),
            Arc::new(MemoryTokenStore::new()),
        )
        .unwrap();

        let first = client.get_access_token().await.unwrap();
        let second = client.get_access_token().await.unwrap();

        assert_eq!(first.access_token.expose(), "at_once");
        assert_eq!(second.access_token.expose(), "at_once");
        assert!(second.expires_in <= 3599 && second.expires_in > 3500);
    }

    #[tokio::test]
    async fn cached_token_from_another_process_is_used() {
        let server = token_server("unused", 0).await;
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        store
            .set(ACCESS_TOKEN_KEY, "at_from_worker".into(), Duration::from_secs(120))
            .await
            .unwrap();

        let client = OAuth2Client::new(
            oauth_config(format!("{}/token", server.uri())),
            reqwest::Client::new(),
            store,
        )
        .unwrap();

        assert!(client.current_token().is_none());
        let token = client.get_access_token().await.unwrap();
        assert_eq!(token.access_token.expose(), "at_from_worker");
        assert_eq!(client.current_token().unwrap().expose(), "at_from_worker");
    }

    #[tokio::test]
    async fn fetch_token_ignores_cache_and_overwrites() {
        let server = token_server("at_fresh", 1).await;
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        store
            .set(ACCESS_TOKEN_KEY, "at_stale".into(), Duration::from_secs(120))
            .await
            .unwrap();

        let client = OAuth2Client::new(
            oauth_config(format!("{}/token", server.uri())),
            reqwest::Client::new(),
            store.clone(),
        )
        .unwrap();

        let token = client.fetch_token().await.unwrap();
        assert_eq!(token.access_token.expose(), "at_fresh");

        let stored = store.get(ACCESS_TOKEN_KEY).await.unwrap().unwrap();
        assert_eq!(stored.value, "at_fresh");
        assert!(stored.expires_in.unwrap() > Duration::from_secs(3590));
    }

    #[tokio::test]
    async fn endpoint_failure_leaves_store_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        let client = OAuth2Client::new(
            oauth_config(server.uri()),
            reqwest::Client::new(),
            store.clone(),
        )
        .unwrap();

        assert!(client.get_access_token().await.is_err());
        assert!(store.get(ACCESS_TOKEN_KEY).await.unwrap().is_none());
        assert!(client.current_token().is_none());
    }
}
