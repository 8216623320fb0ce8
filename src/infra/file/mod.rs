//! File-backed content store.
//!
//! Items live as full serialized [`ContentItem`]s keyed by id inside a
//! [`DocumentFile`]. A hand-maintained file may use the minimal form
//! `{"content": "..."}`; the address is then recovered from the id itself.
//! A watcher task polls the file's modification time and reconciles
//! external edits through the document's reload cycle, broadcasting the
//! resulting diffs to subscribers.

pub mod document;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::application::store::{ContentStore, StoreError};
use crate::domain::{ContentItem, DomainError, ident};

use super::error::InfraError;
pub use document::{ChangeSet, DocumentFile};

#[derive(Clone)]
pub struct FileContentStore {
    doc: Arc<DocumentFile>,
}

impl FileContentStore {
    /// Open (or create on first write) the backing file. Fails when the
    /// file exists but is not valid JSON.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, InfraError> {
        let doc = DocumentFile::open(path)?;
        Ok(Self { doc: Arc::new(doc) })
    }

    /// Subscribe to added/removed/changed key diffs.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.doc.subscribe()
    }

    /// Reconcile with the file on disk immediately.
    pub fn reload(&self) -> ChangeSet {
        self.doc.reload(false)
    }

    /// Spawn a task that polls the file's modification time and reloads on
    /// external changes.
    pub fn spawn_watcher(&self, poll_interval: Duration) -> JoinHandle<()> {
        let doc = Arc::clone(&self.doc);
        info!(
            path = %doc.path().display(),
            poll_seconds = poll_interval.as_secs(),
            "watching content file for external changes"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                doc.reload(false);
            }
        })
    }

    fn fetch(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        match self
            .doc
            .get::<Value>(id)
            .map_err(StoreError::from_persistence)?
        {
            Some(value) => Ok(Some(hydrate(id, &value)?)),
            None => Ok(None),
        }
    }

    fn all_items(&self) -> Result<Vec<ContentItem>, StoreError> {
        self.doc
            .entries()
            .iter()
            .map(|(id, value)| hydrate(id, value))
            .collect()
    }
}

/// The stored form: a full item, or the minimal `{"content": ...}` variant
/// whose address is recovered from the id.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredItem {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    key: Option<String>,
    content: String,
    #[serde(default)]
    original_content: Option<String>,
}

fn hydrate(id: &str, value: &Value) -> Result<ContentItem, StoreError> {
    let stored: StoredItem = serde_json::from_value(value.clone()).map_err(|err| {
        StoreError::from_persistence(format!("stored item `{id}` is malformed: {err}"))
    })?;

    let (location, key) = match (stored.location, stored.key) {
        (location @ Some(_), Some(key)) => (location, key),
        (location, key) => {
            let (id_location, id_key) = ident::parse_id(id)?;
            (location.or(id_location), key.unwrap_or(id_key))
        }
    };

    Ok(ContentItem {
        location,
        key,
        content: stored.content,
        original_content: stored.original_content,
    })
}

fn item_value(item: &ContentItem) -> Result<Value, StoreError> {
    serde_json::to_value(item).map_err(StoreError::from_persistence)
}

#[async_trait]
impl ContentStore for FileContentStore {
    async fn get(
        &self,
        location: Option<&str>,
        key: &str,
    ) -> Result<Option<ContentItem>, StoreError> {
        if let Some(location) = location {
            ident::validate_location(location)?;
        }
        ident::validate_key(key)?;
        self.fetch(&ident::make_id(location, key))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        let (location, key) = ident::parse_id(id)?;
        self.fetch(&ident::make_id(location.as_deref(), &key))
    }

    async fn get_all_content(&self) -> Result<Vec<ContentItem>, StoreError> {
        self.all_items()
    }

    async fn get_all_content_for_location(
        &self,
        location: Option<&str>,
    ) -> Result<Vec<ContentItem>, StoreError> {
        if let Some(location) = location {
            ident::validate_location(location)?;
        }
        Ok(self
            .all_items()?
            .into_iter()
            .filter(|item| item.location.as_deref() == location)
            .collect())
    }

    async fn get_all_locations(&self) -> Result<Vec<String>, StoreError> {
        let mut locations: Vec<String> = self
            .all_items()?
            .into_iter()
            .map(|item| item.location.unwrap_or_default())
            .collect();
        locations.sort();
        locations.dedup();
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

        match self.fetch(&id)? {
            None => {
                let item = ContentItem::new(location, key, default_content);
                self.doc
                    .set(&id, &item)
                    .map_err(StoreError::from_persistence)?;
                Ok(item)
            }
            Some(mut item) if item.original_content.as_deref() != Some(default_content) => {
                // The call site's default changed since the last save; adopt
                // it without disturbing any user edits to the content.
                item.original_content = Some(default_content.to_string());
                self.doc
                    .set(&id, &item)
                    .map_err(StoreError::from_persistence)?;
                Ok(item)
            }
            Some(item) => Ok(item),
        }
    }

    async fn set(&self, items: &[ContentItem]) -> Result<(), StoreError> {
        for item in items {
            if let Some(location) = item.location.as_deref() {
                ident::validate_location(location)?;
            }
            ident::validate_key(&item.key)?;
        }

        let mut pairs = Vec::new();
        for item in items {
            let id = item.id();
            match self.fetch(&id)? {
                Some(existing) if existing.content == item.content => continue,
                _ => pairs.push((id, item_value(item)?)),
            }
        }

        self.doc
            .set_many(pairs)
            .map_err(StoreError::from_persistence)?;
        Ok(())
    }

    async fn set_by_id(&self, pairs: &[(String, String)]) -> Result<(), StoreError> {
        let mut to_write = Vec::new();
        for (id, content) in pairs {
            let (location, key) = ident::parse_id(id)?;
            let id = ident::make_id(location.as_deref(), &key);
            let mut item = self
                .fetch(&id)?
                .ok_or_else(|| DomainError::not_found(id.clone()))?;
            if item.content == *content {
                continue;
            }
            item.content = content.clone();
            to_write.push((id, item_value(&item)?));
        }

        self.doc
            .set_many(to_write)
            .map_err(StoreError::from_persistence)?;
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<(), StoreError> {
        for id in ids {
            ident::validate_id(id)?;
        }
        self.doc
            .remove_many(ids)
            .map_err(StoreError::from_persistence)?;
        Ok(())
    }
}
