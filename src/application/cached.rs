//! Read-through/write-through overlay on any [`ContentStore`].
//!
//! The cache instance is constructed by the host and injected here; there is
//! no ambient global state. Three key namespaces are used: the item's own id,
//! `loc:{location}` for per-location list results, and `all:loc` for the
//! distinct-locations list. Every write invalidates the item entry and its
//! location's list entry; the global list entry is invalidated only when the
//! write could introduce a previously-unknown location, so updating an
//! existing item never discards it.
//!
//! Cache calls are bounded by a timeout and degrade on failure: a restore
//! that errors or times out reads as a miss and the backing store answers.
//! Invalidation and backing-store commit are not transactionally linked; a
//! crash between the two can leave a stale entry until the next write to the
//! same key. Content editing tolerates that window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::cache::{CacheConfig, CachedItem, ItemStore};
use crate::domain::{ContentItem, DomainError, ident};

use super::store::{ContentStore, StoreError};

const ALL_LOCATIONS_KEY: &str = "all:loc";

fn location_list_key(location: Option<&str>) -> String {
    format!("loc:{}", location.unwrap_or(""))
}

pub struct CachedContentStore<S> {
    inner: S,
    cache: Arc<dyn ItemStore>,
    item_ttl: Option<Duration>,
    op_timeout: Duration,
}

impl<S> CachedContentStore<S> {
    pub fn new(inner: S, cache: Arc<dyn ItemStore>, config: &CacheConfig) -> Self {
        Self {
            inner,
            cache,
            item_ttl: config.item_ttl(),
            op_timeout: config.op_timeout(),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    async fn cache_restore(&self, key: &str) -> Option<CachedItem> {
        match tokio::time::timeout(self.op_timeout, self.cache.try_restore(key)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(err)) => {
                warn!(
                    cache_key = key,
                    error = %err,
                    "cache restore failed; falling back to backing store"
                );
                None
            }
            Err(_) => {
                warn!(
                    cache_key = key,
                    "cache restore timed out; falling back to backing store"
                );
                None
            }
        }
    }

    async fn restore_decoded<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let hit = self.cache_restore(key).await?;
        match hit.decode() {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    cache_key = key,
                    error = %err,
                    "discarding undecodable cache entry"
                );
                None
            }
        }
    }

    async fn cache_save(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        secondary_key: Option<&str>,
    ) {
        let save = self.cache.save(key, value, ttl, secondary_key);
        match tokio::time::timeout(self.op_timeout, save).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(cache_key = key, error = %err, "cache save failed"),
            Err(_) => warn!(cache_key = key, "cache save timed out"),
        }
    }

    async fn save_item(&self, item: &ContentItem) {
        let Ok(value) = serde_json::to_value(item) else {
            return;
        };
        let secondary = item.location.clone().unwrap_or_default();
        self.cache_save(&item.id(), value, self.item_ttl, Some(&secondary))
            .await;
    }

    /// List entries live until invalidated; expiry would only widen the
    /// staleness window the invalidation rule already closes.
    async fn save_list(&self, key: &str, value: Value) {
        self.cache_save(key, value, None, None).await;
    }

    async fn cache_delete(&self, key: &str) {
        match tokio::time::timeout(self.op_timeout, self.cache.delete(key)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(
                cache_key = key,
                error = %err,
                "cache invalidation failed; entry may be stale until overwritten"
            ),
            Err(_) => warn!(
                cache_key = key,
                "cache invalidation timed out; entry may be stale until overwritten"
            ),
        }
    }

    /// A location counts as known when its list entry is cached. The probe
    /// errs toward "unknown", which costs one extra global-list rebuild
    /// rather than a stale one.
    async fn location_known(&self, location: Option<&str>) -> bool {
        self.cache_restore(&location_list_key(location)).await.is_some()
    }
}

#[async_trait]
impl<S: ContentStore> ContentStore for CachedContentStore<S> {
    async fn get(
        &self,
        location: Option<&str>,
        key: &str,
    ) -> Result<Option<ContentItem>, StoreError> {
        if let Some(location) = location {
            ident::validate_location(location)?;
        }
        ident::validate_key(key)?;
        let id = ident::make_id(location, key);

        if let Some(item) = self.restore_decoded::<ContentItem>(&id).await {
            return Ok(Some(item));
        }

        let item = self.inner.get(location, key).await?;
        if let Some(item) = &item {
            self.save_item(item).await;
        }
        Ok(item)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        let (location, key) = ident::parse_id(id)?;
        self.get(location.as_deref(), &key).await
    }

    async fn get_all_content(&self) -> Result<Vec<ContentItem>, StoreError> {
        self.inner.get_all_content().await
    }

    async fn get_all_content_for_location(
        &self,
        location: Option<&str>,
    ) -> Result<Vec<ContentItem>, StoreError> {
        if let Some(location) = location {
            ident::validate_location(location)?;
        }
        let list_key = location_list_key(location);

        if let Some(items) = self.restore_decoded::<Vec<ContentItem>>(&list_key).await {
            return Ok(items);
        }

        let items = self.inner.get_all_content_for_location(location).await?;
        if let Ok(value) = serde_json::to_value(&items) {
            self.save_list(&list_key, value).await;
        }
        Ok(items)
    }

    async fn get_all_locations(&self) -> Result<Vec<String>, StoreError> {
        if let Some(locations) = self.restore_decoded::<Vec<String>>(ALL_LOCATIONS_KEY).await {
            return Ok(locations);
        }

        let locations = self.inner.get_all_locations().await?;
        if let Ok(value) = serde_json::to_value(&locations) {
            self.save_list(ALL_LOCATIONS_KEY, value).await;
        }
        Ok(locations)
    }

    async fn get_or_create(
        &self,
        location: Option<&str>,
        key: &str,
        default_content: &str,
    ) -> Result<ContentItem, StoreError> {
        if let Some(location) = location {
            ident::validate_location(location)?;
        }
        ident::validate_key(key)?;
        let id = ident::make_id(location, key);

        if let Some(item) = self.restore_decoded::<ContentItem>(&id).await {
            if item.original_content.as_deref() == Some(default_content) {
                return Ok(item);
            }
        }

        let existing = self.inner.get(location, key).await?;
        match &existing {
            Some(item) if item.original_content.as_deref() == Some(default_content) => {
                // Plain cache miss; nothing will be written.
                self.save_item(item).await;
                return Ok(item.clone());
            }
            Some(_) => {
                // The call site's default drifted; the stored original is
                // about to change.
                self.cache_delete(&id).await;
                self.cache_delete(&location_list_key(location)).await;
            }
            None => {
                let location_was_known = self.location_known(location).await;
                self.cache_delete(&location_list_key(location)).await;
                if !location_was_known {
                    self.cache_delete(ALL_LOCATIONS_KEY).await;
                }
            }
        }

        let item = self.inner.get_or_create(location, key, default_content).await?;
        self.save_item(&item).await;
        Ok(item)
    }

    async fn set(&self, items: &[ContentItem]) -> Result<(), StoreError> {
        for item in items {
            if let Some(location) = item.location.as_deref() {
                ident::validate_location(location)?;
            }
            ident::validate_key(&item.key)?;
        }

        // Dirty-check against the backing store so unchanged items produce
        // no write and no invalidation.
        let mut to_write: Vec<ContentItem> = Vec::new();
        let mut created: Vec<ContentItem> = Vec::new();
        for item in items {
            match self.inner.get(item.location.as_deref(), &item.key).await? {
                Some(current) if current.content == item.content => continue,
                Some(_) => to_write.push(item.clone()),
                None => {
                    created.push(item.clone());
                    to_write.push(item.clone());
                }
            }
        }
        if to_write.is_empty() {
            return Ok(());
        }

        // Probe location familiarity before the deletes below erase the
        // evidence.
        let mut touch_global = false;
        for item in &created {
            if !self.location_known(item.location.as_deref()).await {
                touch_global = true;
            }
        }

        for item in &to_write {
            self.cache_delete(&item.id()).await;
            self.cache_delete(&location_list_key(item.location.as_deref()))
                .await;
        }
        if touch_global {
            self.cache_delete(ALL_LOCATIONS_KEY).await;
        }

        self.inner.set(&to_write).await?;

        for item in &to_write {
            self.save_item(item).await;
        }
        Ok(())
    }

    async fn set_by_id(&self, pairs: &[(String, String)]) -> Result<(), StoreError> {
        // Resolve every id before writing anything, so a missing id fails
        // the whole batch up front.
        let mut updates: Vec<ContentItem> = Vec::new();
        for (id, content) in pairs {
            let (location, key) = ident::parse_id(id)?;
            let existing = self
                .inner
                .get(location.as_deref(), &key)
                .await?
                .ok_or_else(|| DomainError::not_found(id.clone()))?;
            if existing.content == *content {
                continue;
            }
            let mut updated = existing;
            updated.content = content.clone();
            updates.push(updated);
        }
        if updates.is_empty() {
            return Ok(());
        }

        for item in &updates {
            self.cache_delete(&item.id()).await;
            self.cache_delete(&location_list_key(item.location.as_deref()))
                .await;
        }

        let pairs_to_write: Vec<(String, String)> = updates
            .iter()
            .map(|item| (item.id(), item.content.clone()))
            .collect();
        self.inner.set_by_id(&pairs_to_write).await?;

        for item in &updates {
            self.save_item(item).await;
        }
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut addresses = Vec::with_capacity(ids.len());
        for id in ids {
            let (location, _) = ident::parse_id(id)?;
            addresses.push((id.clone(), location));
        }

        for (id, location) in &addresses {
            self.cache_delete(id).await;
            self.cache_delete(&location_list_key(location.as_deref()))
                .await;
        }

        self.inner.remove(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_list_keys_distinguish_global_content() {
        assert_eq!(location_list_key(Some("home")), "loc:home");
        assert_eq!(location_list_key(None), "loc:");
    }
}
