//! SQLite-backed key-value cache and the caller-side freshness envelope.
//!
//! The cache itself stores no expiry. Integrations that care about staleness
//! wrap their payload in a [`Snapshot`], which embeds the fetch timestamp,
//! and compare it against their own interval before trusting the value.
//! This keeps the cache dumb and lets every integration define its own
//! staleness policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_types::{CacheStore, HearthError, HearthResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Key-value cache backed by the `kv_cache` table.
#[derive(Clone)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    /// Create a cache wrapping the given connection. Typically shares the
    /// memory store's connection (see [`crate::MemoryStore::connection`]).
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> HearthResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HearthError::Internal(e.to_string()))
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> HearthResult<Option<serde_json::Value>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT value FROM kv_cache WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, Vec<u8>>(0),
        );
        match result {
            Ok(blob) => {
                let value = serde_json::from_slice(&blob)
                    .map_err(|e| HearthError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(HearthError::Storage(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> HearthResult<()> {
        let conn = self.lock()?;
        let blob =
            serde_json::to_vec(&value).map_err(|e| HearthError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO kv_cache (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, blob, Utc::now().to_rfc3339()],
        )
        .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// A cached payload plus the moment it was fetched.
///
/// Staleness is the caller's decision: `is_fresh` compares the embedded
/// timestamp against the caller's interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the payload was fetched from the external source.
    pub fetched_at: DateTime<Utc>,
    /// The cached payload.
    pub payload: serde_json::Value,
}

impl Snapshot {
    /// Wrap a freshly-fetched payload.
    pub fn now(payload: serde_json::Value) -> Self {
        Self {
            fetched_at: Utc::now(),
            payload,
        }
    }

    /// Whether this snapshot is younger than `interval`.
    pub fn is_fresh(&self, interval: Duration) -> bool {
        let age = Utc::now() - self.fetched_at;
        age.to_std().map(|age| age < interval).unwrap_or(true)
    }

    /// Serialize to the JSON value stored in the cache.
    pub fn to_value(&self) -> HearthResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| HearthError::Serialization(e.to_string()))
    }

    /// Parse a snapshot out of a cached value.
    pub fn from_value(value: serde_json::Value) -> HearthResult<Self> {
        serde_json::from_value(value).map_err(|e| HearthError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn setup() -> SqliteCache {
        let store = MemoryStore::open_in_memory().unwrap();
        SqliteCache::new(store.connection())
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = setup();
        cache.set("feed/home", json!({ "items": [1, 2] })).await.unwrap();
        let value = cache.get("feed/home").await.unwrap().unwrap();
        assert_eq!(value["items"][1], 2);
    }

    #[tokio::test]
    async fn test_miss_is_none_not_error() {
        let cache = setup();
        assert!(cache.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let cache = setup();
        cache.set("k", json!("old")).await.unwrap();
        cache.set("k", json!("new")).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap(), json!("new"));
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_through_cache() {
        let cache = setup();
        let snap = Snapshot::now(json!({ "count": 3 }));
        cache.set("snap", snap.to_value().unwrap()).await.unwrap();

        let loaded = Snapshot::from_value(cache.get("snap").await.unwrap().unwrap()).unwrap();
        assert_eq!(loaded.payload["count"], 3);
        assert!(loaded.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn test_snapshot_staleness() {
        let old = Snapshot {
            fetched_at: Utc::now() - chrono::Duration::seconds(300),
            payload: json!(null),
        };
        assert!(!old.is_fresh(Duration::from_secs(120)));
        assert!(old.is_fresh(Duration::from_secs(600)));
    }
}
