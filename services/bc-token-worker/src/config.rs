//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth2 client secret is loaded from the BC_CLIENT_SECRET env var or
//! `secrets.client_secret_file`, never stored in the TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use bc_auth::AuthConfig;
use bc_refresh::RetryPolicy;
use common::Secret;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    pub token_store: TokenStoreConfig,
    #[serde(default)]
    pub refresh: RetryPolicy,
}

/// Health and metrics listener
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Timeout for token endpoint calls
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Paths to files holding secrets (alternatives to env vars)
#[derive(Debug, Default, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

/// Where the shared token lives
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TokenStoreConfig {
    Memory,
    File { path: PathBuf },
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9464))
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. BC_CLIENT_SECRET env var
    /// 2. secrets.client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.auth.kind.trim().eq_ignore_ascii_case("oauth2") {
            return Err(common::Error::Config(format!(
                "auth.type must be oauth2 for the token worker, got: {}",
                config.auth.kind
            )));
        }

        let secret_file = config.secrets.client_secret_file.clone();
        let oauth = config.auth.oauth2.as_mut().ok_or_else(|| {
            common::Error::Config("missing [auth.oauth2] section".into())
        })?;

        if !oauth.token_url.starts_with("http://") && !oauth.token_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "token_url must start with http:// or https://, got: {}",
                oauth.token_url
            )));
        }

        if oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        if config.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.refresh.max_attempts == 0 {
            return Err(common::Error::Config(
                "refresh.max_attempts must be greater than 0".into(),
            ));
        }

        // Resolve client secret: env var takes precedence over file
        if let Ok(secret) = std::env::var("BC_CLIENT_SECRET") {
            oauth.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                oauth.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("bc-token-worker.toml")
    }
}
