pub mod catalog;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jokerbot_core::{CatalogCache, SqliteCatalogStore};

use crate::config::BotConfig;

#[derive(Parser)]
#[command(
    name = "jokerbot",
    about = "Answers [[name]] mentions in comments with catalog entries",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the comment stream and reply until interrupted
    Run,
    /// Load catalog records from a CSV file
    Import {
        /// CSV file with name, effect, rarity, cost and availability columns
        path: PathBuf,
        /// Field delimiter
        #[arg(long, default_value_t = '|')]
        delimiter: char,
    },
    /// List catalog names
    Names,
    /// Preview the reply for one catalog entry
    Show {
        /// Entity name (case-insensitive)
        name: String,
    },
    /// Remove an entry from the catalog
    Delete {
        /// Entity name (case-insensitive)
        name: String,
    },
    /// Fetch a single comment and process it once
    Reply {
        /// Comment id on the relay
        event_id: String,
    },
}

/// Opens the SQLite catalog behind a cache configured from the environment.
pub async fn open_cache(config: &BotConfig) -> Result<Arc<CatalogCache>> {
    let store = SqliteCatalogStore::open(config.database_path()?).await?;
    let cache = CatalogCache::new(Arc::new(store), config.cache_capacity)
        .with_name_list_policy(config.name_list_policy);
    Ok(Arc::new(cache))
}
