mod cache;
mod import;
mod memory;
mod sqlite;
mod store;

pub use cache::{CacheStats, CatalogCache, NameListPolicy, DEFAULT_CACHE_CAPACITY};
pub use import::{CsvImporter, ImportError, ImportReport, REQUIRED_COLUMNS};
pub use memory::MemoryCatalogStore;
pub use sqlite::SqliteCatalogStore;
pub use store::{CatalogStore, StoreError, StoreResult};
