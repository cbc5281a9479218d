use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::store::{CatalogStore, StoreResult};
use crate::record::{normalize_name, EntityRecord};
use crate::Result;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// How `list_names` treats its cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameListPolicy {
    /// Read the store on every call. The name list decides what gets matched,
    /// so a stale copy means missed references.
    #[default]
    AlwaysRefresh,
    /// Serve the cached list until a write invalidates it.
    CacheUntilInvalidated,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Record(String),
    NameList,
}

#[derive(Debug, Clone)]
enum CacheValue {
    Record(EntityRecord),
    Names(Vec<String>),
}

/// Fixed-capacity map that evicts the least recently used entry. Order in the
/// underlying `IndexMap` is recency: the back is the most recent.
struct LruMap<K, V> {
    entries: IndexMap<K, V>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruMap<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&mut self, key: &K) -> Option<&V> {
        let value = self.entries.shift_remove(key)?;
        self.entries.insert(key.clone(), value);
        self.entries.get(key)
    }

    fn insert(&mut self, key: K, value: V) {
        self.entries.shift_remove(&key);
        self.entries.insert(key, value);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct CacheState {
    entries: LruMap<CacheKey, CacheValue>,
    /// Bumped on every invalidation. A store read that started under an older
    /// generation must not populate the cache.
    generation: u64,
}

impl CacheState {
    fn invalidate(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.generation += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Cache-aside front for a [`CatalogStore`]. Reads populate on miss, writes go
/// to the store first and then drop the affected entries.
pub struct CatalogCache {
    store: Arc<dyn CatalogStore>,
    state: Mutex<CacheState>,
    name_list_policy: NameListPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CatalogCache {
    pub fn new(store: Arc<dyn CatalogStore>, capacity: usize) -> Self {
        Self {
            store,
            state: Mutex::new(CacheState {
                entries: LruMap::new(capacity.max(1)),
                generation: 0,
            }),
            name_list_policy: NameListPolicy::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_name_list_policy(mut self, policy: NameListPolicy) -> Self {
        self.name_list_policy = policy;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub async fn get_by_name(&self, name: &str) -> StoreResult<Option<EntityRecord>> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Ok(None);
        }
        let key = CacheKey::Record(name.clone());

        let generation = {
            let mut state = self.state.lock().await;
            if let Some(CacheValue::Record(record)) = state.entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(record.clone()));
            }
            state.generation
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        match self.store.get(&name).await {
            Ok(Some(record)) => {
                let mut state = self.state.lock().await;
                if state.generation == generation {
                    state.entries.insert(key, CacheValue::Record(record.clone()));
                }
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.state.lock().await.invalidate(&key);
                tracing::warn!(name = %name, error = %e, "Catalog lookup failed");
                Err(e)
            }
        }
    }

    /// All catalog names, sorted ascending.
    pub async fn list_names(&self) -> StoreResult<Vec<String>> {
        let cached = self.name_list_policy == NameListPolicy::CacheUntilInvalidated;

        let generation = {
            let mut state = self.state.lock().await;
            if cached {
                if let Some(CacheValue::Names(names)) = state.entries.get(&CacheKey::NameList) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(names.clone());
                }
            }
            state.generation
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        match self.store.list().await {
            Ok(mut names) => {
                names.sort();
                if cached {
                    let mut state = self.state.lock().await;
                    if state.generation == generation {
                        state
                            .entries
                            .insert(CacheKey::NameList, CacheValue::Names(names.clone()));
                    }
                }
                Ok(names)
            }
            Err(e) => {
                self.state.lock().await.invalidate(&CacheKey::NameList);
                tracing::warn!(error = %e, "Catalog name listing failed");
                Err(e)
            }
        }
    }

    /// Trims, validates and writes the record, then drops the cached copies
    /// it affects. Nothing is invalidated if the store rejects the write.
    pub async fn upsert(&self, record: &EntityRecord) -> Result<()> {
        let record = record.trimmed();
        record.validate()?;
        self.store.upsert(&record).await?;

        self.invalidate_name(&record.key()).await;
        tracing::info!(name = %record.name, "Catalog record saved");
        Ok(())
    }

    /// Idempotent: returns whether a record existed, and invalidates either way.
    pub async fn delete(&self, name: &str) -> StoreResult<bool> {
        let existed = self.store.delete(name).await?;

        self.invalidate_name(&normalize_name(name)).await;
        tracing::info!(name, existed, "Catalog record deleted");
        Ok(existed)
    }

    async fn invalidate_name(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.invalidate(&CacheKey::Record(key.to_string()));
        state.invalidate(&CacheKey::NameList);
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.state.lock().await.entries.len(),
        }
    }
}
