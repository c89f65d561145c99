//! TTL cache for GET responses
//!
//! Keys are `"{endpoint}:{company}:{query}"` where `query` is canonical
//! JSON (object keys sorted at every level), so logically identical reads
//! share an entry regardless of parameter order. Mutations invalidate by
//! the `"{endpoint}:{company}:"` prefix. A leading `/` on the endpoint is
//! dropped, matching how request URLs are joined onto the base URL.

use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use tracing::debug;

use crate::descriptor::QueryParams;
use crate::error::{Error, Result};

pub struct ResponseCache {
    entries: Cache<String, Value>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .support_invalidation_closures()
            .build();
        Self { entries, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(endpoint: &str, company: Option<&str>, query: Option<&QueryParams>) -> String {
        let query = match query {
            Some(q) if !q.is_empty() => canonical_json(&Value::Object(q.clone())),
            _ => String::new(),
        };
        format!("{}{query}", Self::prefix(endpoint, company))
    }

    pub fn prefix(endpoint: &str, company: Option<&str>) -> String {
        format!(
            "{}:{}:",
            endpoint.trim_start_matches('/'),
            company.unwrap_or_default()
        )
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).await
    }

    pub async fn insert(&self, key: String, value: Value) {
        self.entries.insert(key, value).await;
    }

    /// Drop every entry whose key starts with `prefix`. Entries matching at
    /// call time are never returned afterwards.
    pub fn invalidate_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = prefix.to_string();
        debug!(prefix = %prefix, "invalidating cached responses");
        self.entries
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
            .map(|_| ())
            .map_err(|e| Error::Configuration(format!("cache invalidation failed: {e}")))
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }
}

/// JSON text with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
