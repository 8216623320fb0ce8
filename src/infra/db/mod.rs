//! Postgres-backed content store.
//!
//! The table is keyed by the composite `(location, key)` primary key; the id
//! is never persisted. A composite key cannot hold NULL, so global content
//! (no location) is stored with `location = ''` and mapped back to `None` on
//! the way out.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::application::store::{ContentStore, StoreError};
use crate::domain::{ContentItem, DomainError, ident};

use super::error::InfraError;

const SELECT_COLUMNS: &str = "SELECT location, key, content, original_content FROM content_items";

#[derive(sqlx::FromRow)]
struct ContentItemRow {
    location: String,
    key: String,
    content: String,
    original_content: Option<String>,
}

impl From<ContentItemRow> for ContentItem {
    fn from(row: ContentItemRow) -> Self {
        Self {
            location: if row.location.is_empty() {
                None
            } else {
                Some(row.location)
            },
            key: row.key,
            content: row.content,
            original_content: row.original_content,
        }
    }
}

fn db_location(location: Option<&str>) -> &str {
    location.unwrap_or("")
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    StoreError::from_persistence(err)
}

pub struct PostgresContentStore {
    pool: PgPool,
}

impl PostgresContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, InfraError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|err| InfraError::database(err.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), InfraError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|err| InfraError::database(err.to_string()))
    }

    async fn fetch_one(
        &self,
        location: Option<&str>,
        key: &str,
    ) -> Result<Option<ContentItem>, StoreError> {
        let row = sqlx::query_as::<_, ContentItemRow>(&format!(
            "{SELECT_COLUMNS} WHERE location = $1 AND key = $2"
        ))
        .bind(db_location(location))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(ContentItem::from))
    }
}

#[async_trait]
impl ContentStore for PostgresContentStore {
    async fn get(
        &self,
        location: Option<&str>,
        key: &str,
    ) -> Result<Option<ContentItem>, StoreError> {
        if let Some(location) = location {
            ident::validate_location(location)?;
        }
        ident::validate_key(key)?;
        self.fetch_one(location, key).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        let (location, key) = ident::parse_id(id)?;
        self.fetch_one(location.as_deref(), &key).await
    }

    async fn get_all_content(&self) -> Result<Vec<ContentItem>, StoreError> {
        let rows = sqlx::query_as::<_, ContentItemRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY location, key"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ContentItem::from).collect())
    }

    async fn get_all_content_for_location(
        &self,
        location: Option<&str>,
    ) -> Result<Vec<ContentItem>, StoreError> {
        if let Some(location) = location {
            ident::validate_location(location)?;
        }
        let rows = sqlx::query_as::<_, ContentItemRow>(&format!(
            "{SELECT_COLUMNS} WHERE location = $1 ORDER BY key"
        ))
        .bind(db_location(location))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(ContentItem::from).collect())
    }

    async fn get_all_locations(&self) -> Result<Vec<String>, StoreError> {
        let locations: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT location FROM content_items ORDER BY location")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(locations.into_iter().map(|(location,)| location).collect())
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

        match self.fetch_one(location, key).await? {
            Some(item) if item.original_content.as_deref() == Some(default_content) => Ok(item),
            Some(mut item) => {
                sqlx::query(
                    "UPDATE content_items SET original_content = $3 \
                     WHERE location = $1 AND key = $2",
                )
                .bind(db_location(location))
                .bind(key)
                .bind(default_content)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
                item.original_content = Some(default_content.to_string());
                Ok(item)
            }
            None => {
                // DO NOTHING keeps a racing creator's row; the re-read below
                // picks up whichever row won.
                sqlx::query(
                    "INSERT INTO content_items (location, key, content, original_content) \
                     VALUES ($1, $2, $3, $4) ON CONFLICT (location, key) DO NOTHING",
                )
                .bind(db_location(location))
                .bind(key)
                .bind(default_content)
                .bind(default_content)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

                let mut item = self.fetch_one(location, key).await?.ok_or_else(|| {
                    StoreError::from_persistence("row disappeared during get_or_create")
                })?;
                if item.original_content.as_deref() != Some(default_content) {
                    sqlx::query(
                        "UPDATE content_items SET original_content = $3 \
                         WHERE location = $1 AND key = $2",
                    )
                    .bind(db_location(location))
                    .bind(key)
                    .bind(default_content)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;
                    item.original_content = Some(default_content.to_string());
                }
                Ok(item)
            }
        }
    }

    async fn set(&self, items: &[ContentItem]) -> Result<(), StoreError> {
        for item in items {
            if let Some(location) = item.location.as_deref() {
                ident::validate_location(location)?;
            }
            ident::validate_key(&item.key)?;
        }

        let mut to_write = Vec::new();
        for item in items {
            match self.fetch_one(item.location.as_deref(), &item.key).await? {
                Some(existing) if existing.content == item.content => continue,
                _ => to_write.push(item),
            }
        }
        if to_write.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for item in to_write {
            sqlx::query(
                "INSERT INTO content_items (location, key, content, original_content) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (location, key) DO UPDATE \
                 SET content = EXCLUDED.content, original_content = EXCLUDED.original_content",
            )
            .bind(db_location(item.location.as_deref()))
            .bind(&item.key)
            .bind(&item.content)
            .bind(&item.original_content)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn set_by_id(&self, pairs: &[(String, String)]) -> Result<(), StoreError> {
        // Resolve every id up front so a missing one fails the batch before
        // anything is written.
        let mut updates = Vec::new();
        for (id, content) in pairs {
            let (location, key) = ident::parse_id(id)?;
            let existing = self
                .fetch_one(location.as_deref(), &key)
                .await?
                .ok_or_else(|| DomainError::not_found(id.clone()))?;
            if existing.content == *content {
                continue;
            }
            updates.push((location, key, content));
        }
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for (location, key, content) in updates {
            sqlx::query(
                "UPDATE content_items SET content = $3 WHERE location = $1 AND key = $2",
            )
            .bind(db_location(location.as_deref()))
            .bind(&key)
            .bind(content)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn remove(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut addresses = Vec::with_capacity(ids.len());
        for id in ids {
            addresses.push(ident::parse_id(id)?);
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for (location, key) in addresses {
            sqlx::query("DELETE FROM content_items WHERE location = $1 AND key = $2")
                .bind(db_location(location.as_deref()))
                .bind(&key)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_map_the_empty_location_back_to_global() {
        let row = ContentItemRow {
            location: String::new(),
            key: "footer".to_string(),
            content: "© Example".to_string(),
            original_content: Some("© Example".to_string()),
        };
        let item = ContentItem::from(row);
        assert_eq!(item.location, None);
        assert_eq!(item.id(), "/footer");
    }

    #[test]
    fn db_location_round_trips_with_row_mapping() {
        assert_eq!(db_location(Some("home")), "home");
        assert_eq!(db_location(None), "");
    }
}
