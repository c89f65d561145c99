//! The request record that flows through middleware
//!
//! A [`RequestDescriptor`] is a plain value: middleware receives one and
//! returns a (possibly different) one. Nothing here talks to the network.

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::{Error, Result};

/// Per-call company override.
pub const COMPANY_HEADER: &str = "x-custom-request-company";

/// Per-call company selector (`Company-Name`, `Company-Id`, `Url-Complete`).
pub const COMPANY_IDENTIFIER_HEADER: &str = "x-custom-request-company-identifier";

/// Instruction from routing to the base company rule. Never sent upstream.
pub const COMPANY_COMMAND_HEADER: &str = "x-custom-params-company-command";

/// Query parameters. Values are rendered with [`query_value`].
pub type QueryParams = serde_json::Map<String, Value>;

/// Render one query value for the URL: strings verbatim, the rest as JSON.
pub fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Request-scoped settings carried alongside the HTTP parts.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub primary_key: Option<Vec<String>>,
    pub use_cache: bool,
    pub company: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Relative to the pipeline's base URL, or absolute.
    pub url: String,
    pub headers: HeaderMap,
    pub query: QueryParams,
    pub body: Option<Value>,
    pub metadata: RequestMetadata,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: QueryParams::new(),
            body: None,
            metadata: RequestMetadata::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.set_header(name, value)?;
        Ok(self)
    }

    /// Header value as text. Non-UTF-8 and empty values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Configuration(format!("invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers
            .remove(name)
            .and_then(|v| v.to_str().ok().map(str::to_string))
    }
}

/// Caller-supplied options for one pipeline call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub company: Option<String>,
    pub headers: Vec<(String, String)>,
    pub primary_key: Option<Vec<String>>,
    pub use_cache: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Last non-empty value supplied for `name`, case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, v)| n.eq_ignore_ascii_case(name) && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    /// Turn the options into a descriptor for `method` and `url`.
    pub fn describe(&self, method: Method, url: impl Into<String>) -> Result<RequestDescriptor> {
        let mut descriptor = RequestDescriptor::new(method, url);
        for (name, value) in &self.headers {
            descriptor.set_header(name, value)?;
        }
        descriptor.metadata = RequestMetadata {
            primary_key: self.primary_key.clone(),
            use_cache: self.use_cache,
            company: self.company.clone(),
        };
        Ok(descriptor)
    }
}
