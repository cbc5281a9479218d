use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use super::cache::CatalogCache;
use crate::record::EntityRecord;

pub const REQUIRED_COLUMNS: [&str; 5] = ["name", "effect", "rarity", "cost", "availability"];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    name: String,
    effect: String,
    rarity: String,
    cost: String,
    availability: String,
}

impl From<CsvRow> for EntityRecord {
    fn from(row: CsvRow) -> Self {
        Self::new(row.name, row.effect, row.rarity, row.cost, row.availability).trimmed()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub total: usize,
    pub imported: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ImportReport {
    fn record_failure(&mut self, message: String) {
        self.failed += 1;
        self.errors.push(message);
    }
}

/// Loads catalog records from a `|`-delimited CSV file through the cache, so
/// every write invalidates whatever the bot has cached for that name.
pub struct CsvImporter<'a> {
    cache: &'a CatalogCache,
    delimiter: u8,
}

impl<'a> CsvImporter<'a> {
    #[must_use]
    pub const fn new(cache: &'a CatalogCache) -> Self {
        Self {
            cache,
            delimiter: b'|',
        }
    }

    #[must_use]
    pub const fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub async fn import_path(&self, path: &Path) -> Result<ImportReport, ImportError> {
        let file = std::fs::File::open(path)?;
        tracing::info!(path = %path.display(), "Importing catalog");
        self.import_reader(file).await
    }

    /// Rows that fail to parse, validate or save are counted and reported;
    /// only an unreadable file or missing columns abort the import.
    pub async fn import_reader<R: Read>(&self, reader: R) -> Result<ImportReport, ImportError> {
        let records = self.read_records(reader)?;
        let mut report = ImportReport {
            total: records.len(),
            ..Default::default()
        };

        for (line, parsed) in records {
            let record = match parsed {
                Ok(record) => record,
                Err(message) => {
                    report.record_failure(format!("row {line}: {message}"));
                    continue;
                }
            };

            match self.cache.upsert(&record).await {
                Ok(()) => report.imported += 1,
                Err(e) => {
                    tracing::warn!(name = %record.name, error = %e, "Failed to import record");
                    report.record_failure(format!("row {line} ({}): {e}", record.name));
                }
            }
        }

        tracing::info!(
            total = report.total,
            imported = report.imported,
            failed = report.failed,
            "Catalog import finished"
        );
        Ok(report)
    }

    #[allow(clippy::type_complexity)]
    fn read_records<R: Read>(
        &self,
        reader: R,
    ) -> Result<Vec<(u64, Result<EntityRecord, String>)>, ImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let missing: Vec<String> = REQUIRED_COLUMNS
            .into_iter()
            .filter(|column| !headers.iter().any(|h| h == *column))
            .map(String::from)
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns(missing));
        }

        let records = csv_reader
            .deserialize::<CsvRow>()
            .enumerate()
            .map(|(index, row)| {
                // Header is line 1.
                let line = index as u64 + 2;
                (line, row.map(EntityRecord::from).map_err(|e| e.to_string()))
            })
            .collect();

        Ok(records)
    }
}
