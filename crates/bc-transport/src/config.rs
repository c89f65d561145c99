//! Transport configuration
//!
//! Deserialised from the `[api]` and `[company]` sections of a service's
//! TOML file. Every tunable has a default so a config only needs the base
//! URL and the company preference.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which form of company routing a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CompanyIdentifier {
    /// `?company=<name>` query parameter.
    #[serde(rename = "Company-Name")]
    Name,
    /// `companies(<id>)` path segment.
    #[serde(rename = "Company-Id")]
    Id,
    /// The caller's URL already addresses the company.
    #[serde(rename = "Url-Complete")]
    UrlComplete,
}

impl CompanyIdentifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyIdentifier::Name => "Company-Name",
            CompanyIdentifier::Id => "Company-Id",
            CompanyIdentifier::UrlComplete => "Url-Complete",
        }
    }
}

impl fmt::Display for CompanyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompanyIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Company-Name" => Ok(CompanyIdentifier::Name),
            "Company-Id" => Ok(CompanyIdentifier::Id),
            "Url-Complete" => Ok(CompanyIdentifier::UrlComplete),
            other => Err(Error::Configuration(format!(
                "unknown company identifier '{other}'"
            ))),
        }
    }
}

/// Tenant preference: how the company is addressed and its default value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyConfig {
    #[serde(rename = "use", default)]
    pub preference: Option<CompanyIdentifier>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl CompanyConfig {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            preference: Some(CompanyIdentifier::Name),
            name: Some(name.into()),
            id: None,
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            preference: Some(CompanyIdentifier::Id),
            name: None,
            id: Some(id.into()),
        }
    }

    pub fn url_complete() -> Self {
        Self {
            preference: Some(CompanyIdentifier::UrlComplete),
            name: None,
            id: None,
        }
    }

    /// The preferred identifier, required for every pipeline.
    pub fn preference(&self) -> Result<CompanyIdentifier> {
        self.preference.ok_or_else(|| {
            Error::Configuration("company preferred identifier must be specified".into())
        })
    }

    /// Company value used when a request names none: the configured name
    /// or id for the preferred identifier, nothing for `Url-Complete`.
    pub fn default_company(&self) -> Result<Option<String>> {
        let value = match self.preference()? {
            CompanyIdentifier::Name => non_blank(&self.name),
            CompanyIdentifier::Id => non_blank(&self.id),
            CompanyIdentifier::UrlComplete => return Ok(None),
        };
        match value {
            Some(v) => Ok(Some(v)),
            None => Err(Error::Configuration(format!(
                "company preference {} requires a default value",
                self.preference()?
            ))),
        }
    }

    /// Configured default for one identifier kind, if any.
    pub fn default_for(&self, kind: CompanyIdentifier) -> Option<String> {
        match kind {
            CompanyIdentifier::Name => non_blank(&self.name),
            CompanyIdentifier::Id => non_blank(&self.id),
            CompanyIdentifier::UrlComplete => None,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

/// Request pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the tenant's OData API, without a trailing path.
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum gap between consecutive request starts.
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub company: CompanyConfig,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_max_concurrent() -> usize {
    100
}

fn default_min_spacing_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl TransportConfig {
    /// Defaults for everything but the base URL and company.
    pub fn new(base_url: impl Into<String>, company: CompanyConfig) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            max_concurrent: default_max_concurrent(),
            min_spacing_ms: default_min_spacing_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            company,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            Error::Configuration(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Configuration(format!(
                "base_url must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Configuration("timeout_secs must be > 0".into()));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Configuration("max_concurrent must be > 0".into()));
        }
        if self.cache_ttl_secs == 0 {
            return Err(Error::Configuration("cache_ttl_secs must be > 0".into()));
        }
        self.company.default_company()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_section_with_defaults() {
        let toml = r#"
            base_url = "https://api.businesscentral.dynamics.com/v2.0/tenant/Production/api/v2.0"

            [company]
            use = "Company-Name"
            name = "CRONUS USA, Inc."
        "#;
        let config: TransportConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.max_concurrent, 100);
        assert_eq!(config.min_spacing(), Duration::from_millis(100));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.company.preference, Some(CompanyIdentifier::Name));
        config.validate().unwrap();
    }

    #[test]
    fn default_company_follows_preference() {
        assert_eq!(
            CompanyConfig::by_name("CRONUS").default_company().unwrap(),
            Some("CRONUS".to_string())
        );
        let mut both = CompanyConfig::by_id("7b6e0b6c-3f3a-4f7e-9a53-0a9c1b2d3e4f");
        both.name = Some("CRONUS".into());
        assert_eq!(
            both.default_company().unwrap().as_deref(),
            Some("7b6e0b6c-3f3a-4f7e-9a53-0a9c1b2d3e4f")
        );
        assert_eq!(CompanyConfig::url_complete().default_company().unwrap(), None);
    }

    #[test]
    fn missing_preference_is_configuration_error() {
        let err = CompanyConfig::default().default_company().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn preference_without_value_is_rejected() {
        let config = CompanyConfig {
            preference: Some(CompanyIdentifier::Id),
            name: Some("CRONUS".into()),
            id: Some("  ".into()),
        };
        assert!(config.default_company().is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = TransportConfig::new("ftp://bc.example.com", CompanyConfig::by_name("X"));
        assert!(config.validate().is_err());

        config.base_url = "https://bc.example.com/api".into();
        config.max_concurrent = 0;
        assert!(config.validate().is_err());

        config.max_concurrent = 10;
        config.validate().unwrap();
    }

    #[test]
    fn identifier_round_trips_through_str() {
        for kind in [
            CompanyIdentifier::Name,
            CompanyIdentifier::Id,
            CompanyIdentifier::UrlComplete,
        ] {
            assert_eq!(kind.as_str().parse::<CompanyIdentifier>().unwrap(), kind);
        }
        assert!("company-name".parse::<CompanyIdentifier>().is_err());
    }
}
