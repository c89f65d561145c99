//! Shared key-value token cache
//!
//! The bearer token and the refresh cadence live in a store that every
//! process can see. The store is the source of truth; anything held in memory
//! is only an accelerator. Entries carry a TTL and disappear once it lapses,
//! which is the only expiry check performed on tokens.
//!
//! Two implementations ship with the crate:
//! - [`MemoryTokenStore`]: process-local, for single-process deployments and tests.
//! - [`FileTokenStore`]: a JSON file re-read on every access so that several
//!   processes on one host share a token. Writes are atomic (temp file + rename).

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Boxed future returned by [`TokenStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A live cache entry together with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: String,
    /// Remaining TTL. `None` when the backend cannot report it.
    pub expires_in: Option<Duration>,
}

/// Shared key-value store with per-entry TTL.
///
/// Uses `Pin<Box<dyn Future>>` return types so it can be held as
/// `Arc<dyn TokenStore>`. There is no compare-and-swap: concurrent writers
/// simply overwrite each other.
pub trait TokenStore: Send + Sync {
    /// Read a live entry. Expired entries read as `None`.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<CachedValue>>;

    /// Write an entry that expires after `ttl`. A zero TTL stores nothing.
    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Remove an entry. Removing a missing key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local token store.
///
/// Uses `tokio::time::Instant` so tests can drive expiry with a paused clock.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<CachedValue>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => Ok(Some(CachedValue {
                    value: entry.value.clone(),
                    expires_in: Some(entry.expires_at - now),
                })),
                Some(_) => {
                    entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            if ttl.is_zero() {
                entries.remove(key);
                return Ok(());
            }
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
            Ok(())
        })
    }
}

/// On-disk representation of one entry.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta)
/// so that a process reading the file later sees the correct remaining TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    expires_at: u64,
}

/// File-backed token store shared between processes on one host.
///
/// Every operation re-reads the file, so a token written by the refresh
/// worker is visible to API processes on their next read. A tokio Mutex
/// serializes read-modify-write cycles within this process; across processes
/// the last atomic rename wins.
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Open the store at `path`, creating it as `{}` if it does not exist.
    pub async fn load(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "token store file not found, creating empty store");
            write_atomic(&path, &HashMap::new()).await?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<HashMap<String, StoredEntry>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(Error::Store(format!("reading token store: {e}"))),
        };
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| Error::StoreParse(format!("parsing token store: {e}")))
    }
}

impl TokenStore for FileTokenStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<CachedValue>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let entries = self.read_entries().await?;
            let now = now_millis();
            Ok(entries
                .get(key)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| CachedValue {
                    value: entry.value.clone(),
                    expires_in: Some(Duration::from_millis(entry.expires_at - now)),
                }))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut entries = self.read_entries().await?;
            let now = now_millis();
            entries.retain(|_, entry| entry.expires_at > now);
            if ttl.is_zero() {
                entries.remove(key);
            } else {
                entries.insert(
                    key.to_string(),
                    StoredEntry {
                        value,
                        expires_at: now + ttl.as_millis() as u64,
                    },
                );
            }
            debug!(key, ttl_secs = ttl.as_secs(), "token store entry written");
            write_atomic(&self.path, &entries).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut entries = self.read_entries().await?;
            if entries.remove(key).is_some() {
                write_atomic(&self.path, &entries).await?;
            }
            Ok(())
        })
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write the store atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since the file holds bearer tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, StoredEntry>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::StoreParse(format!("serializing token store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("token store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".token-store.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp token store: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting token store permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp token store: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn memory_entry_expires_after_ttl() {
        let store = MemoryTokenStore::new();
        store
            .set("k", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let hit = store.get("k").await.unwrap().unwrap();
        assert_eq!(hit.value, "v");
        assert_eq!(hit.expires_in, Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = store.get("k").await.unwrap().unwrap();
        assert_eq!(hit.expires_in, Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_zero_ttl_stores_nothing() {
        let store = MemoryTokenStore::new();
        store.set("k", "old".into(), Duration::from_secs(5)).await.unwrap();
        store.set("k", "new".into(), Duration::ZERO).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_delete_missing_key_is_ok() {
        let store = MemoryTokenStore::new();
        store.delete("absent").await.unwrap();
    }

    #[tokio::test]
    async fn file_store_cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        assert!(!path.exists());
        let store = FileTokenStore::load(path.clone()).await.unwrap();
        assert!(path.exists());
        assert!(store.get("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_is_shared_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let writer = FileTokenStore::load(path.clone()).await.unwrap();
        let reader = FileTokenStore::load(path).await.unwrap();

        writer
            .set("token", "at_shared".into(), Duration::from_secs(3600))
            .await
            .unwrap();

        let hit = reader.get("token").await.unwrap().unwrap();
        assert_eq!(hit.value, "at_shared");
        let remaining = hit.expires_in.unwrap();
        assert!(remaining > Duration::from_secs(3590), "got {remaining:?}");
    }

    #[tokio::test]
    async fn file_store_ignores_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let stale = serde_json::json!({
            "token": { "value": "at_old", "expires_at": 1_000 }
        });
        std::fs::write(&path, stale.to_string()).unwrap();

        let store = FileTokenStore::load(path).await.unwrap();
        assert!(store.get("token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_delete_then_set_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::load(dir.path().join("tokens.json"))
            .await
            .unwrap();

        store.set("token", "first".into(), Duration::from_secs(60)).await.unwrap();
        store.delete("token").await.unwrap();
        assert!(store.get("token").await.unwrap().is_none());
        store.set("token", "second".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("token").await.unwrap().unwrap().value, "second");
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileTokenStore::load(path).await.unwrap();
        let err = store.get("token").await.unwrap_err();
        assert!(matches!(err, Error::StoreParse(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = FileTokenStore::load(path.clone()).await.unwrap();
        store.set("token", "at".into(), Duration::from_secs(60)).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token store must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = Arc::new(FileTokenStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set(&format!("key-{i}"), format!("v{i}"), Duration::from_secs(60))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }
}
