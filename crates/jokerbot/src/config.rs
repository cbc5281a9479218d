use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use jokerbot_core::catalog::{NameListPolicy, DEFAULT_CACHE_CAPACITY};
use jokerbot_core::format::DEFAULT_MAX_REPLY_RECORDS;
use jokerbot_core::{ExtractorConfig, PipelineConfig, RelayConfig, RetryConfig};
use url::Url;

pub const DEFAULT_DATABASE: &str = "jokerbot.db";
pub const DEFAULT_USERNAME: &str = "jokerbot";

/// Everything the binary reads from the environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub database: PathBuf,
    pub relay_url: Option<Url>,
    pub relay_token: Option<String>,
    pub username: String,
    pub blocklist: Vec<String>,
    pub extractor: ExtractorConfig,
    pub max_reply_records: usize,
    pub retry: RetryConfig,
    pub cache_capacity: usize,
    pub name_list_policy: NameListPolicy,
    pub poll_interval_ms: Option<u64>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut extractor = ExtractorConfig::default();
        if let Some(pattern) = var("JOKERBOT_MATCH_PATTERN") {
            extractor.pattern = pattern;
        }
        if let Some(max) = parse(&var, "JOKERBOT_MAX_MATCHES")? {
            extractor.max_matches = max;
        }

        let mut retry = RetryConfig::default();
        if let Some(limit) = parse(&var, "JOKERBOT_RETRY_LIMIT")? {
            retry.retry_limit = limit;
        }
        if let Some(secs) = parse(&var, "JOKERBOT_RETRY_DELAY_SECS")? {
            retry.base_delay_ms = u64::saturating_mul(secs, 1_000);
        }

        let relay_url = var("JOKERBOT_RELAY_URL")
            .map(|raw| Url::parse(&raw).with_context(|| format!("JOKERBOT_RELAY_URL is not a URL: {raw}")))
            .transpose()?;

        let name_list_policy = match var("JOKERBOT_CACHE_NAME_LIST").as_deref() {
            None | Some("0" | "false") => NameListPolicy::AlwaysRefresh,
            Some("1" | "true") => NameListPolicy::CacheUntilInvalidated,
            Some(other) => bail!("JOKERBOT_CACHE_NAME_LIST must be true or false, got {other:?}"),
        };

        Ok(Self {
            database: var("JOKERBOT_DB").map_or_else(|| PathBuf::from(DEFAULT_DATABASE), PathBuf::from),
            relay_url,
            relay_token: var("JOKERBOT_RELAY_TOKEN"),
            username: var("JOKERBOT_USERNAME").unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            blocklist: var("JOKERBOT_BLOCKLIST")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|user| !user.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            extractor,
            max_reply_records: parse(&var, "JOKERBOT_MAX_REPLY_RECORDS")?
                .unwrap_or(DEFAULT_MAX_REPLY_RECORDS),
            retry,
            cache_capacity: parse(&var, "JOKERBOT_CACHE_CAPACITY")?.unwrap_or(DEFAULT_CACHE_CAPACITY),
            name_list_policy,
            poll_interval_ms: parse(&var, "JOKERBOT_POLL_INTERVAL_MS")?,
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            extractor: self.extractor.clone(),
            bot_identity: self.username.clone(),
            blocklist: self.blocklist.clone(),
            max_reply_records: self.max_reply_records,
            ..PipelineConfig::default()
        }
    }

    pub fn relay_config(&self) -> Result<RelayConfig> {
        let Some(url) = self.relay_url.clone() else {
            bail!("JOKERBOT_RELAY_URL is not set");
        };

        let mut config = RelayConfig::new(url);
        if let Some(token) = &self.relay_token {
            config = config.with_token(token.clone());
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }
        Ok(config)
    }

    pub fn database_path(&self) -> Result<&str> {
        self.database
            .to_str()
            .with_context(|| format!("database path is not UTF-8: {}", self.database.display()))
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{key} must be a number, got {raw:?}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<BotConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        BotConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.database, PathBuf::from("jokerbot.db"));
        assert_eq!(config.username, "jokerbot");
        assert!(config.blocklist.is_empty());
        assert_eq!(config.retry.retry_limit, 3);
        assert_eq!(config.name_list_policy, NameListPolicy::AlwaysRefresh);
        assert!(config.relay_config().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("JOKERBOT_USERNAME", "balatro_helper"),
            ("JOKERBOT_BLOCKLIST", "AutoModerator, , spammer"),
            ("JOKERBOT_RETRY_LIMIT", "5"),
            ("JOKERBOT_RETRY_DELAY_SECS", "2"),
            ("JOKERBOT_MAX_MATCHES", "3"),
            ("JOKERBOT_CACHE_NAME_LIST", "true"),
            ("JOKERBOT_RELAY_URL", "http://localhost:9000/relay"),
            ("JOKERBOT_RELAY_TOKEN", "tok"),
            ("JOKERBOT_POLL_INTERVAL_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.blocklist, ["AutoModerator", "spammer"]);
        assert_eq!(config.retry.retry_limit, 5);
        assert_eq!(config.retry.base_delay_ms, 2_000);
        assert_eq!(config.extractor.max_matches, 3);
        assert_eq!(config.name_list_policy, NameListPolicy::CacheUntilInvalidated);

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.bot_identity, "balatro_helper");

        let relay = config.relay_config().unwrap();
        assert_eq!(relay.token.as_deref(), Some("tok"));
        assert_eq!(relay.poll_interval_ms, 250);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = config_from(&[("JOKERBOT_MAX_REPLY_RECORDS", "ten")]).unwrap_err();
        assert!(err.to_string().contains("JOKERBOT_MAX_REPLY_RECORDS"));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(config_from(&[("JOKERBOT_RELAY_URL", "not a url")]).is_err());
    }
}
