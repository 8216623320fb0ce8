//! Overlay cache in front of a content store.
//!
//! The [`ItemStore`] contract models a keyed value cache with TTL metadata,
//! a secondary index (lookup of keys by a grouping attribute), and an
//! all-keys registry so cached keys can be enumerated without scanning a
//! shared keyspace. [`MemoryStore`] is the in-process implementation; the
//! trait boundary leaves room for a networked backend, which is why every
//! operation is async and fallible.

pub mod config;
pub mod item;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use config::CacheConfig;
pub use item::CachedItem;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Upsert a value. A `ttl` of `None` keeps the entry until it is
    /// explicitly deleted. When a `secondary_key` is supplied the key is
    /// registered under that index value and the association is recorded in
    /// the all-keys registry.
    async fn save(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        secondary_key: Option<&str>,
    ) -> Result<(), CacheError>;

    /// Point lookup. Expired entries read as absent.
    async fn try_restore(&self, key: &str) -> Result<Option<CachedItem>, CacheError>;

    /// Remove the primary entry and its registry row, reporting whether the
    /// entry was present. Secondary-index rows are left to lazy cleanup;
    /// every index read filters through an existence check.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Keys registered under a secondary index value whose primary entry
    /// still exists.
    async fn keys_by_secondary_index(&self, secondary_key: &str)
    -> Result<Vec<String>, CacheError>;

    /// All registered keys whose primary entry still exists.
    async fn all_keys(&self) -> Result<Vec<String>, CacheError>;
}
