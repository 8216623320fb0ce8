//! In-process [`ItemStore`] implementation.
//!
//! The layout mirrors what a networked key-value backend would use: primary
//! entries under `{prefix}:{key}`, one hash per secondary index value under
//! `{prefix}-ix:{secondary}`, and an all-keys registry recording each key's
//! secondary association. Expiry is lazy: expired entries are dropped when
//! read. `delete` removes the primary entry and registry row only; index
//! rows outlive their data and are filtered through an existence check on
//! every lookup.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use time::OffsetDateTime;

use super::item::CachedItem;
use super::{CacheError, ItemStore};

struct Entry {
    value: Value,
    expires_at: Option<OffsetDateTime>,
    secondary_key: Option<String>,
}

impl Entry {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct MemoryStore {
    key_prefix: String,
    index_prefix: String,
    entries: DashMap<String, Entry>,
    index: DashMap<String, HashSet<String>>,
    registry: DashMap<String, Option<String>>,
}

impl MemoryStore {
    /// Create a store whose keys live under the `key_spec` prefix.
    pub fn new(key_spec: &str) -> Self {
        Self {
            key_prefix: format!("{key_spec}:"),
            index_prefix: format!("{key_spec}-ix:"),
            entries: DashMap::new(),
            index: DashMap::new(),
            registry: DashMap::new(),
        }
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    fn index_key(&self, secondary_key: &str) -> String {
        format!("{}{secondary_key}", self.index_prefix)
    }

    /// Whether a live (unexpired) primary entry exists, dropping it if it
    /// turns out to be expired.
    fn entry_exists(&self, key: &str) -> bool {
        let cache_key = self.entry_key(key);
        let now = OffsetDateTime::now_utc();
        let expired = match self.entries.get(&cache_key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };
        if expired {
            self.entries.remove(&cache_key);
            return false;
        }
        true
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn save(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        secondary_key: Option<&str>,
    ) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| OffsetDateTime::now_utc() + ttl);
        self.entries.insert(
            self.entry_key(key),
            Entry {
                value,
                expires_at,
                secondary_key: secondary_key.map(str::to_string),
            },
        );

        if let Some(secondary) = secondary_key {
            self.index
                .entry(self.index_key(secondary))
                .or_default()
                .insert(key.to_string());
        }

        self.registry
            .insert(key.to_string(), secondary_key.map(str::to_string));
        Ok(())
    }

    async fn try_restore(&self, key: &str) -> Result<Option<CachedItem>, CacheError> {
        let cache_key = self.entry_key(key);
        let now = OffsetDateTime::now_utc();

        let restored = match self.entries.get(&cache_key) {
            Some(entry) if !entry.is_expired(now) => Some(CachedItem {
                value: entry.value.clone(),
                expires_at: entry.expires_at,
                secondary_key: entry.secondary_key.clone(),
            }),
            Some(_) => None,
            None => return Ok(None),
        };

        if restored.is_none() {
            self.entries.remove(&cache_key);
        }
        Ok(restored)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let was_present = self.entries.remove(&self.entry_key(key)).is_some();
        self.registry.remove(key);
        Ok(was_present)
    }

    async fn keys_by_secondary_index(
        &self,
        secondary_key: &str,
    ) -> Result<Vec<String>, CacheError> {
        let keys = match self.index.get(&self.index_key(secondary_key)) {
            Some(set) => set.iter().cloned().collect::<Vec<_>>(),
            None => return Ok(Vec::new()),
        };
        Ok(keys
            .into_iter()
            .filter(|key| self.entry_exists(key))
            .collect())
    }

    async fn all_keys(&self) -> Result<Vec<String>, CacheError> {
        let keys: Vec<String> = self
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        Ok(keys
            .into_iter()
            .filter(|key| self.entry_exists(key))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn save_and_restore_round_trip() {
        let store = MemoryStore::new("test");
        store
            .save("home/title", json!({"content": "Welcome"}), None, None)
            .await
            .expect("save");

        let restored = store
            .try_restore("home/title")
            .await
            .expect("restore")
            .expect("present");
        assert_eq!(restored.value["content"], "Welcome");
        assert_eq!(restored.expires_at, None);

        assert!(
            store
                .try_restore("home/missing")
                .await
                .expect("restore")
                .is_none()
        );
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryStore::new("test");
        store
            .save("k", json!(1), Some(Duration::ZERO), None)
            .await
            .expect("save");

        assert!(store.try_restore("k").await.expect("restore").is_none());
    }

    #[tokio::test]
    async fn delete_reports_presence_and_clears_registry() {
        let store = MemoryStore::new("test");
        store
            .save("k", json!(1), None, Some("home"))
            .await
            .expect("save");

        assert!(store.delete("k").await.expect("delete"));
        assert!(!store.delete("k").await.expect("delete"));
        assert!(store.all_keys().await.expect("keys").is_empty());
    }

    #[tokio::test]
    async fn secondary_index_filters_deleted_entries() {
        let store = MemoryStore::new("test");
        store
            .save("home/title", json!(1), None, Some("home"))
            .await
            .expect("save");
        store
            .save("home/body", json!(2), None, Some("home"))
            .await
            .expect("save");
        store
            .save("about/title", json!(3), None, Some("about"))
            .await
            .expect("save");

        let mut keys = store
            .keys_by_secondary_index("home")
            .await
            .expect("lookup");
        keys.sort();
        assert_eq!(keys, vec!["home/body", "home/title"]);

        // The index row survives the delete but the lookup filters it out.
        store.delete("home/body").await.expect("delete");
        let keys = store
            .keys_by_secondary_index("home")
            .await
            .expect("lookup");
        assert_eq!(keys, vec!["home/title"]);
    }

    #[tokio::test]
    async fn all_keys_enumerates_live_entries() {
        let store = MemoryStore::new("test");
        store
            .save("a", json!(1), None, Some("loc"))
            .await
            .expect("save");
        store.save("b", json!(2), None, None).await.expect("save");
        store
            .save("c", json!(3), Some(Duration::ZERO), None)
            .await
            .expect("save");

        let mut keys = store.all_keys().await.expect("keys");
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn prefixes_partition_a_shared_namespace() {
        let first = MemoryStore::new("one");
        let second = MemoryStore::new("two");
        first.save("k", json!(1), None, None).await.expect("save");
        assert!(second.try_restore("k").await.expect("restore").is_none());
    }
}
