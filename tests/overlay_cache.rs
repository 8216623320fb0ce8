//! Invalidation and fallback semantics of the cache-fronted content store.
//!
//! A recording wrapper around the file store counts backing-store calls so
//! the tests can tell a cache hit from a re-query.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stanza::application::{CachedContentStore, ContentStore, StoreError};
use stanza::cache::{CacheConfig, CacheError, CachedItem, ItemStore, MemoryStore};
use stanza::domain::ContentItem;
use stanza::infra::file::FileContentStore;

#[derive(Default)]
struct Calls {
    get: AtomicUsize,
    all_locations: AtomicUsize,
    for_location: AtomicUsize,
}

struct RecordingStore {
    inner: FileContentStore,
    calls: Arc<Calls>,
}

#[async_trait]
impl ContentStore for RecordingStore {
    async fn get(
        &self,
        location: Option<&str>,
        key: &str,
    ) -> Result<Option<ContentItem>, StoreError> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        self.inner.get(location, key).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        self.inner.get_by_id(id).await
    }

    async fn get_all_content(&self) -> Result<Vec<ContentItem>, StoreError> {
        self.inner.get_all_content().await
    }

    async fn get_all_content_for_location(
        &self,
        location: Option<&str>,
    ) -> Result<Vec<ContentItem>, StoreError> {
        self.calls.for_location.fetch_add(1, Ordering::SeqCst);
        self.inner.get_all_content_for_location(location).await
    }

    async fn get_all_locations(&self) -> Result<Vec<String>, StoreError> {
        self.calls.all_locations.fetch_add(1, Ordering::SeqCst);
        self.inner.get_all_locations().await
    }

    async fn get_or_create(
        &self,
        location: Option<&str>,
        key: &str,
        default_content: &str,
    ) -> Result<ContentItem, StoreError> {
        self.inner.get_or_create(location, key, default_content).await
    }

    async fn set(&self, items: &[ContentItem]) -> Result<(), StoreError> {
        self.inner.set(items).await
    }

    async fn set_by_id(&self, pairs: &[(String, String)]) -> Result<(), StoreError> {
        self.inner.set_by_id(pairs).await
    }

    async fn remove(&self, ids: &[String]) -> Result<(), StoreError> {
        self.inner.remove(ids).await
    }
}

fn cached_store() -> (
    tempfile::TempDir,
    Arc<Calls>,
    CachedContentStore<RecordingStore>,
) {
    let dir = tempfile::tempdir().expect("tempdir");
    let inner = FileContentStore::open(dir.path().join("content.json")).expect("open");
    let calls = Arc::new(Calls::default());
    let recording = RecordingStore {
        inner,
        calls: Arc::clone(&calls),
    };
    let config = CacheConfig::default();
    let cache = Arc::new(MemoryStore::new(&config.key_prefix));
    (dir, calls, CachedContentStore::new(recording, cache, &config))
}

#[tokio::test]
async fn point_reads_are_read_through() {
    let (_dir, calls, store) = cached_store();
    store
        .get_or_create(Some("home"), "title", "Welcome")
        .await
        .expect("create");

    let first = store
        .get(Some("home"), "title")
        .await
        .expect("get")
        .expect("present");
    let hits_after_first = calls.get.load(Ordering::SeqCst);

    let second = store
        .get(Some("home"), "title")
        .await
        .expect("get")
        .expect("present");

    assert_eq!(first, second);
    assert_eq!(
        calls.get.load(Ordering::SeqCst),
        hits_after_first,
        "second read must come from the cache"
    );
}

#[tokio::test]
async fn updating_an_existing_item_leaves_the_global_list_cached() {
    let (_dir, calls, store) = cached_store();
    store
        .get_or_create(Some("home"), "title", "Welcome")
        .await
        .expect("create");

    let locations = store.get_all_locations().await.expect("locations");
    assert_eq!(locations, vec!["home".to_string()]);
    assert_eq!(calls.all_locations.load(Ordering::SeqCst), 1);

    // Repeat read is served from the cache.
    store.get_all_locations().await.expect("locations");
    assert_eq!(calls.all_locations.load(Ordering::SeqCst), 1);

    // Updating an existing item in a known location must not discard it.
    let mut edited = ContentItem::new(Some("home"), "title", "Welcome");
    edited.content = "Hello".to_string();
    store.set(std::slice::from_ref(&edited)).await.expect("set");

    store.get_all_locations().await.expect("locations");
    assert_eq!(
        calls.all_locations.load(Ordering::SeqCst),
        1,
        "global list must still be cached after an update"
    );
}

#[tokio::test]
async fn a_previously_unseen_location_invalidates_the_global_list() {
    let (_dir, calls, store) = cached_store();
    store
        .get_or_create(Some("home"), "title", "Welcome")
        .await
        .expect("create");

    assert_eq!(
        store.get_all_locations().await.expect("locations"),
        vec!["home".to_string()]
    );
    assert_eq!(calls.all_locations.load(Ordering::SeqCst), 1);

    store
        .set(&[ContentItem::new(Some("about"), "title", "About us")])
        .await
        .expect("set");

    let locations = store.get_all_locations().await.expect("locations");
    assert_eq!(locations, vec!["about".to_string(), "home".to_string()]);
    assert_eq!(
        calls.all_locations.load(Ordering::SeqCst),
        2,
        "a new location must rebuild the global list"
    );
}

#[tokio::test]
async fn a_new_item_invalidates_its_location_list() {
    let (_dir, calls, store) = cached_store();
    store
        .get_or_create(Some("home"), "title", "Welcome")
        .await
        .expect("create");

    let items = store
        .get_all_content_for_location(Some("home"))
        .await
        .expect("list");
    assert_eq!(items.len(), 1);
    assert_eq!(calls.for_location.load(Ordering::SeqCst), 1);

    store
        .set(&[ContentItem::new(Some("home"), "subtitle", "And more")])
        .await
        .expect("set");

    let items = store
        .get_all_content_for_location(Some("home"))
        .await
        .expect("list");
    assert_eq!(items.len(), 2);
    assert_eq!(
        calls.for_location.load(Ordering::SeqCst),
        2,
        "the location list must be rebuilt after an insert"
    );
}

#[tokio::test]
async fn saves_by_id_refresh_the_item_cache() {
    let (_dir, calls, store) = cached_store();
    store
        .get_or_create(Some("home"), "title", "Welcome")
        .await
        .expect("create");
    store
        .get(Some("home"), "title")
        .await
        .expect("warm")
        .expect("present");
    let reads_before = calls.get.load(Ordering::SeqCst);

    store
        .set_by_id(&[("home/title".to_string(), "Edited".to_string())])
        .await
        .expect("save");

    let item = store
        .get(Some("home"), "title")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(item.content, "Edited");
    assert_eq!(item.original_content.as_deref(), Some("Welcome"));
    assert_eq!(
        calls.get.load(Ordering::SeqCst),
        reads_before + 1,
        "set_by_id re-reads the backing store once for its dirty check, \
         then serves the refreshed entry from the cache"
    );
}

#[tokio::test]
async fn removals_do_not_serve_stale_items() {
    let (_dir, _calls, store) = cached_store();
    store
        .get_or_create(Some("home"), "title", "Welcome")
        .await
        .expect("create");
    store
        .get(Some("home"), "title")
        .await
        .expect("warm")
        .expect("present");

    store
        .remove(&["home/title".to_string()])
        .await
        .expect("remove");

    assert!(
        store
            .get(Some("home"), "title")
            .await
            .expect("get")
            .is_none()
    );
}

/// A cache whose backend is down; every operation fails.
struct FailingCache;

#[async_trait]
impl ItemStore for FailingCache {
    async fn save(
        &self,
        _key: &str,
        _value: Value,
        _ttl: Option<Duration>,
        _secondary_key: Option<&str>,
    ) -> Result<(), CacheError> {
        Err(CacheError::backend("connection refused"))
    }

    async fn try_restore(&self, _key: &str) -> Result<Option<CachedItem>, CacheError> {
        Err(CacheError::backend("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::backend("connection refused"))
    }

    async fn keys_by_secondary_index(
        &self,
        _secondary_key: &str,
    ) -> Result<Vec<String>, CacheError> {
        Err(CacheError::backend("connection refused"))
    }

    async fn all_keys(&self) -> Result<Vec<String>, CacheError> {
        Err(CacheError::backend("connection refused"))
    }
}

#[tokio::test]
async fn an_unreachable_cache_degrades_to_the_backing_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inner = FileContentStore::open(dir.path().join("content.json")).expect("open");
    let store = CachedContentStore::new(inner, Arc::new(FailingCache), &CacheConfig::default());

    let created = store
        .get_or_create(Some("home"), "title", "Welcome")
        .await
        .expect("create despite cache failure");
    assert_eq!(created.content, "Welcome");

    let read = store
        .get(Some("home"), "title")
        .await
        .expect("read despite cache failure")
        .expect("present");
    assert_eq!(read, created);

    store
        .set_by_id(&[("home/title".to_string(), "Edited".to_string())])
        .await
        .expect("write despite cache failure");
    assert_eq!(
        store
            .get(Some("home"), "title")
            .await
            .expect("get")
            .expect("present")
            .content,
        "Edited"
    );
}
