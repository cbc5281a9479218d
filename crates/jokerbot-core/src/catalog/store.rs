use thiserror::Error;

use crate::record::EntityRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Catalog store unavailable: {0}")]
    Unavailable(String),

    #[error("Catalog query failed: {0}")]
    Query(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether the same call could succeed if repeated later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Query(_) => false,
            Self::Database(e) => matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent catalog of entity records. Names are matched case-insensitively.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// `Ok(None)` when no record has that name.
    async fn get(&self, name: &str) -> StoreResult<Option<EntityRecord>>;

    /// Every record name, sorted ascending.
    async fn list(&self) -> StoreResult<Vec<String>>;

    /// Inserts the record or replaces the one with the same name.
    async fn upsert(&self, record: &EntityRecord) -> StoreResult<()>;

    /// Returns whether a record was removed. Deleting a missing name is not an error.
    async fn delete(&self, name: &str) -> StoreResult<bool>;
}
