use std::path::Path;

use anyhow::{bail, Result};
use jokerbot_core::{CsvImporter, ReplyFormatter};

use super::open_cache;
use crate::config::BotConfig;

pub async fn run_import(config: &BotConfig, path: &Path, delimiter: char) -> Result<()> {
    let Ok(delimiter) = u8::try_from(delimiter) else {
        bail!("delimiter must be a single-byte character");
    };

    let cache = open_cache(config).await?;
    let report = CsvImporter::new(&cache)
        .with_delimiter(delimiter)
        .import_path(path)
        .await?;

    println!("Imported {} of {} records", report.imported, report.total);
    for error in &report.errors {
        eprintln!("  {error}");
    }
    Ok(())
}

pub async fn run_names(config: &BotConfig) -> Result<()> {
    let cache = open_cache(config).await?;
    for name in cache.list_names().await? {
        println!("{name}");
    }
    Ok(())
}

pub async fn run_show(config: &BotConfig, name: &str) -> Result<()> {
    let cache = open_cache(config).await?;
    let Some(record) = cache.get_by_name(name).await? else {
        bail!("{name:?} is not in the catalog");
    };

    let formatter = ReplyFormatter::for_identity(&config.username, config.max_reply_records);
    let reply = formatter.format(&[record]);
    if reply.is_empty() {
        bail!("{name:?} is malformed and cannot be rendered");
    }
    println!("{}", reply.text);
    Ok(())
}

pub async fn run_delete(config: &BotConfig, name: &str) -> Result<()> {
    let cache = open_cache(config).await?;
    if cache.delete(name).await? {
        println!("Deleted {name}");
    } else {
        println!("{name} was not in the catalog");
    }
    Ok(())
}
