use std::collections::BTreeMap;

use tokio::sync::RwLock;

use super::store::{CatalogStore, StoreResult};
use crate::record::{normalize_name, EntityRecord};

/// In-process catalog, keyed by normalized name.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    records: RwLock<BTreeMap<String, EntityRecord>>,
}

impl MemoryCatalogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = EntityRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.key(), r)).collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get(&self, name: &str) -> StoreResult<Option<EntityRecord>> {
        Ok(self.records.read().await.get(&normalize_name(name)).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .records
            .read()
            .await
            .values()
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn upsert(&self, record: &EntityRecord) -> StoreResult<()> {
        self.records.write().await.insert(record.key(), record.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        Ok(self.records.write().await.remove(&normalize_name(name)).is_some())
    }
}
