//! Authentication strategies
//!
//! [`AuthStrategy`] is a closed set: Basic and NTLM are stateless request
//! decorators, OAuth2 additionally owns a token lifecycle through
//! [`OAuth2Client`]. `authenticate` turns a strategy into an
//! [`AuthenticatedClient`] that every outbound request goes through.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::oauth2::OAuth2Client;
use crate::store::TokenStore;
use crate::token::OAuth2Config;

/// Authentication section of the configuration.
///
/// `kind` selects the strategy (`basic`, `ntlm`, `oauth2`, case-insensitive).
/// The password is overlaid from the environment, never read from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub oauth2: Option<OAuth2Config>,
}

#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: Secret<String>,
}

#[derive(Clone)]
pub struct NtlmCredentials {
    pub username: String,
    pub password: Secret<String>,
    pub domain: String,
}

impl NtlmCredentials {
    /// `DOMAIN\user`, or just `user` when no domain is configured.
    pub fn qualified_username(&self) -> String {
        if self.domain.is_empty() {
            self.username.clone()
        } else {
            format!("{}\\{}", self.domain, self.username)
        }
    }
}

/// Settings applied to the underlying HTTP client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub max_idle_per_host: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_idle_per_host: 50,
        }
    }
}

/// How outbound requests are authenticated.
#[derive(Clone)]
pub enum AuthStrategy {
    Basic(BasicCredentials),
    Ntlm(NtlmCredentials),
    OAuth2(Arc<OAuth2Client>),
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::Basic(c) => write!(f, "Basic({})", c.username),
            AuthStrategy::Ntlm(c) => write!(f, "Ntlm({})", c.qualified_username()),
            AuthStrategy::OAuth2(c) => write!(f, "OAuth2({})", c.config().client_id),
        }
    }
}

impl AuthStrategy {
    /// Build the strategy named by `config.kind`.
    ///
    /// The token store is only used by OAuth2; the HTTP client is used for
    /// token endpoint calls.
    pub fn from_config(
        config: AuthConfig,
        http: reqwest::Client,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let kind = config.kind.trim().to_lowercase();
        match kind.as_str() {
            "basic" => {
                let (username, password) = username_password(&config)?;
                Ok(AuthStrategy::Basic(BasicCredentials { username, password }))
            }
            "ntlm" => {
                let (username, password) = username_password(&config)?;
                Ok(AuthStrategy::Ntlm(NtlmCredentials {
                    username,
                    password,
                    domain: config.domain.clone().unwrap_or_default(),
                }))
            }
            "oauth2" => {
                let oauth = config
                    .oauth2
                    .ok_or_else(|| Error::Config("auth type oauth2 requires [auth.oauth2]".into()))?;
                Ok(AuthStrategy::OAuth2(Arc::new(OAuth2Client::new(
                    oauth, http, store,
                )?)))
            }
            _ => Err(Error::UnsupportedAuthType(config.kind)),
        }
    }

    /// Identifier for logging.
    pub fn id(&self) -> &'static str {
        match self {
            AuthStrategy::Basic(_) => "basic",
            AuthStrategy::Ntlm(_) => "ntlm",
            AuthStrategy::OAuth2(_) => "oauth2",
        }
    }

    /// The OAuth2 client, for strategies that have one.
    pub fn oauth2(&self) -> Option<&Arc<OAuth2Client>> {
        match self {
            AuthStrategy::OAuth2(client) => Some(client),
            _ => None,
        }
    }

    /// Build the HTTP client all requests are sent through.
    pub fn authenticate(&self, settings: &ClientSettings) -> Result<AuthenticatedClient> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;

        Ok(AuthenticatedClient {
            http,
            strategy: self.clone(),
        })
    }

    fn decorate(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            AuthStrategy::Basic(c) => builder.basic_auth(&c.username, Some(c.password.expose())),
            AuthStrategy::Ntlm(c) => {
                builder.basic_auth(c.qualified_username(), Some(c.password.expose()))
            }
            // Until a token has been fetched in this process the request goes
            // out without a bearer; callers warm it with get_access_token.
            AuthStrategy::OAuth2(client) => match client.current_token() {
                Some(token) => builder.bearer_auth(token.expose()),
                None => builder,
            },
        }
    }
}

fn username_password(config: &AuthConfig) -> Result<(String, Secret<String>)> {
    let username = config
        .username
        .clone()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("auth type {} requires a username", config.kind)))?;
    let password = config
        .password
        .clone()
        .filter(|p| !p.is_blank())
        .ok_or_else(|| Error::Config(format!("auth type {} requires a password", config.kind)))?;
    Ok((username, password))
}

/// An HTTP client bound to one authentication strategy.
#[derive(Clone, Debug)]
pub struct AuthenticatedClient {
    http: reqwest::Client,
    strategy: AuthStrategy,
}

impl AuthenticatedClient {
    /// Start a request with credentials attached.
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.strategy.decorate(self.http.request(method, url))
    }

    /// Send a request built with [`request`](Self::request).
    pub async fn execute(&self, request: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.http.execute(request).await
    }

    pub fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }
}
