use sqlx::{
    types::{time::OffsetDateTime, uuid::Uuid},
    Pool, Postgres,
};
use tracing::{debug, info};

use crate::{
    db,
    models::Category,
    ordering::{self, CategoryChanges, Direction, OrderingError},
};

#[derive(Debug, thiserror::Error)]
pub enum CategoryStoreError {
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<sqlx::Error> for CategoryStoreError {
    fn from(e: sqlx::Error) -> Self {
        CategoryStoreError::Storage(e.into())
    }
}

/// Applies ordering operations to the `categories` table. Each call reads,
/// computes and writes inside one locked transaction.
#[derive(Clone)]
pub struct CategoryStore {
    db_pool: Pool<Postgres>,
}

impl CategoryStore {
    pub fn new(db_pool: Pool<Postgres>) -> Self {
        Self { db_pool }
    }

    async fn apply<F>(&self, operation: &'static str, compute: F) -> Result<CategoryChanges, CategoryStoreError>
    where
        F: FnOnce(&[Category]) -> Result<CategoryChanges, OrderingError>,
    {
        let mut tx = self.db_pool.begin().await?;
        db::lock_categories(&mut *tx).await?;
        let current = db::fetch_categories(&mut *tx).await?;

        // An Err here drops the transaction, which rolls back.
        let changes = compute(&current)?;
        if changes.is_empty() {
            debug!(operation, "Category operation produced no changes");
            return Ok(changes);
        }

        db::apply_category_changes(&mut *tx, &changes).await?;
        tx.commit().await?;

        crate::metrics::CATEGORY_WRITES.inc_by((changes.writes.len() + changes.deletes.len()) as f64);
        info!(
            operation,
            written = changes.writes.len(),
            deleted = changes.deletes.len(),
            "Category changes committed"
        );
        Ok(changes)
    }

    /// Repairs the collection and returns it sorted by position.
    pub async fn load(&self, now: OffsetDateTime) -> Result<Vec<Category>, CategoryStoreError> {
        crate::metrics::CATEGORY_REPAIRS.inc();
        let changes = self.apply("repair", |current| Ok(ordering::repair(current, now))).await?;
        Ok(changes.categories)
    }

    /// Returns true when a dynamic name was rewritten.
    pub async fn refresh_dynamic(&self, now: OffsetDateTime) -> Result<bool, CategoryStoreError> {
        let changes = self
            .apply("refresh_dynamic", |current| Ok(ordering::refresh_dynamic(current, now)))
            .await?;
        Ok(!changes.writes.is_empty())
    }

    pub async fn create(&self, name_en: &str, name_kn: &str) -> Result<Vec<Category>, CategoryStoreError> {
        let changes = self
            .apply("create", |current| ordering::append_custom(current, name_en, name_kn))
            .await?;
        Ok(changes.categories)
    }

    pub async fn rename(&self, id: Uuid, name_en: &str, name_kn: &str) -> Result<Vec<Category>, CategoryStoreError> {
        let changes = self
            .apply("rename", |current| ordering::rename(current, id, name_en, name_kn))
            .await?;
        Ok(changes.categories)
    }

    pub async fn delete(&self, id: Uuid) -> Result<Vec<Category>, CategoryStoreError> {
        let changes = self
            .apply("delete", |current| ordering::remove(current, id))
            .await?;
        Ok(changes.categories)
    }

    pub async fn move_in_direction(
        &self,
        id: Uuid,
        direction: Direction,
    ) -> Result<Vec<Category>, CategoryStoreError> {
        let changes = self
            .apply("move", |current| ordering::move_in_direction(current, id, direction))
            .await?;
        Ok(changes.categories)
    }

    pub async fn move_to(&self, id: Uuid, position: usize) -> Result<Vec<Category>, CategoryStoreError> {
        let changes = self
            .apply("move", |current| ordering::move_to(current, id, position))
            .await?;
        Ok(changes.categories)
    }

    pub async fn dedupe_by_name(&self) -> Result<Vec<Category>, CategoryStoreError> {
        let changes = self
            .apply("dedupe", |current| Ok(ordering::dedupe_by_name(current)))
            .await?;
        Ok(changes.categories)
    }
}
