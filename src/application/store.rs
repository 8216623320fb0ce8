//! The content store contract.
//!
//! Every backing strategy (file, Postgres, cache-fronted) implements
//! [`ContentStore`] independently; surrounding features depend only on this
//! seam. All operations validate their string inputs through
//! [`crate::domain::ident`] before touching storage, return `Ok(None)` for
//! absent single-item lookups, and empty collections for absent lists.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ContentItem, DomainError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Domain(DomainError::Validation { .. }))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Domain(DomainError::NotFound { .. }))
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Look up one item by its address. `None` when absent.
    async fn get(
        &self,
        location: Option<&str>,
        key: &str,
    ) -> Result<Option<ContentItem>, StoreError>;

    /// Look up one item by id (parsed back into an address first).
    async fn get_by_id(&self, id: &str) -> Result<Option<ContentItem>, StoreError>;

    /// Every item in the store.
    async fn get_all_content(&self) -> Result<Vec<ContentItem>, StoreError>;

    /// Every item for one location; `None` selects global content.
    async fn get_all_content_for_location(
        &self,
        location: Option<&str>,
    ) -> Result<Vec<ContentItem>, StoreError>;

    /// Distinct location names. Global content is reported as an empty
    /// string. May include locations whose items have since been removed.
    async fn get_all_locations(&self) -> Result<Vec<String>, StoreError>;

    /// Read-through create. An absent item is created with
    /// `content == original_content == default_content`. When the item
    /// exists but the call site's default has drifted, `original_content`
    /// is updated to the new default while any user-edited `content` is
    /// preserved.
    async fn get_or_create(
        &self,
        location: Option<&str>,
        key: &str,
        default_content: &str,
    ) -> Result<ContentItem, StoreError>;

    /// Bulk upsert by address. Items whose stored `content` already equals
    /// the incoming value are skipped entirely: no write, no notification,
    /// no cache invalidation.
    async fn set(&self, items: &[ContentItem]) -> Result<(), StoreError>;

    /// Bulk content-only update addressed by id. Update-only: a pair naming
    /// an id that does not exist fails with a not-found error before any
    /// write is applied.
    async fn set_by_id(&self, pairs: &[(String, String)]) -> Result<(), StoreError>;

    /// Bulk delete by id. Absent ids are ignored.
    async fn remove(&self, ids: &[String]) -> Result<(), StoreError>;
}
