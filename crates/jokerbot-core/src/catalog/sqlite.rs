use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use super::store::{CatalogStore, StoreResult};
use crate::record::{normalize_name, EntityRecord};

const INIT_SQL: &str = r"
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    name_key TEXT NOT NULL UNIQUE,
    effect TEXT NOT NULL,
    rarity TEXT NOT NULL,
    cost TEXT NOT NULL,
    availability TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
";

type RecordRow = (String, String, String, String, String);

/// Catalog persisted in a SQLite database. Names are unique by their
/// normalized form, so `Joker` and ` joker ` are the same record.
pub struct SqliteCatalogStore {
    pool: Pool<Sqlite>,
}

impl SqliteCatalogStore {
    pub async fn open(path: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{path}?mode=rwc"))
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;
        tracing::debug!(path, "Opened catalog database");

        Ok(Self { pool })
    }

    pub async fn open_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn count(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn get(&self, name: &str) -> StoreResult<Option<EntityRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(
            r"
            SELECT name, effect, rarity, cost, availability
            FROM entities WHERE name_key = ?
            ",
        )
        .bind(normalize_name(name))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, effect, rarity, cost, availability)| EntityRecord {
            name,
            effect,
            rarity,
            cost,
            availability,
        }))
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM entities ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn upsert(&self, record: &EntityRecord) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO entities (name, name_key, effect, rarity, cost, availability, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name_key) DO UPDATE SET
                name = excluded.name,
                effect = excluded.effect,
                rarity = excluded.rarity,
                cost = excluded.cost,
                availability = excluded.availability,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&record.name)
        .bind(record.key())
        .bind(&record.effect)
        .bind(&record.rarity)
        .bind(&record.cost)
        .bind(&record.availability)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE name_key = ?")
            .bind(normalize_name(name))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint() -> EntityRecord {
        EntityRecord::new(
            "Blueprint",
            "Copies ability of Joker to the right",
            "Rare",
            "$10",
            "Win a run",
        )
    }

    #[tokio::test]
    async fn test_record_crud() {
        let store = SqliteCatalogStore::open_memory().await.unwrap();

        store.upsert(&blueprint()).await.unwrap();

        let fetched = store.get("BLUEPRINT").await.unwrap();
        assert_eq!(fetched, Some(blueprint()));

        let mut updated = blueprint();
        updated.cost = "$12".into();
        store.upsert(&updated).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("blueprint").await.unwrap().unwrap().cost, "$12");

        assert!(store.delete("Blueprint").await.unwrap());
        assert_eq!(store.get("blueprint").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_an_error() {
        let store = SqliteCatalogStore::open_memory().await.unwrap();

        assert!(!store.delete("nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let store = SqliteCatalogStore::open_memory().await.unwrap();
        for name in ["Joker", "Blueprint", "Cavendish"] {
            let record = EntityRecord {
                name: name.into(),
                ..blueprint()
            };
            store.upsert(&record).await.unwrap();
        }

        assert_eq!(
            store.list().await.unwrap(),
            vec!["Blueprint", "Cavendish", "Joker"]
        );
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let path = path.to_string_lossy().to_string();

        {
            let store = SqliteCatalogStore::open(&path).await.unwrap();
            store.upsert(&blueprint()).await.unwrap();
        }

        let reopened = SqliteCatalogStore::open(&path).await.unwrap();
        assert_eq!(reopened.list().await.unwrap(), vec!["Blueprint"]);
    }
}
