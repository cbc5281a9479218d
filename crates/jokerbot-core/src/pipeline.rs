use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::catalog::CatalogCache;
use crate::delivery::{DeliveryError, ResilientStream};
use crate::extract::{EventGate, Extractor, ExtractorConfig, PhraseSet};
use crate::format::{ReplyFormatter, DEFAULT_MAX_REPLY_RECORDS};
use crate::record::{EntityRecord, InboundEvent};
use crate::Result;

pub const DEFAULT_RECENT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extractor: ExtractorConfig,
    /// Account the bot posts as; its own comments are never answered
    pub bot_identity: String,
    pub blocklist: Vec<String>,
    pub max_reply_records: usize,
    /// Event ids remembered for duplicate suppression
    pub recent_event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            bot_identity: String::new(),
            blocklist: Vec::new(),
            max_reply_records: DEFAULT_MAX_REPLY_RECORDS,
            recent_event_capacity: DEFAULT_RECENT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Gated,
    AlreadyHandled,
    NoMatches,
    NoRecords,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Replied { matched: usize, resolved: usize },
    Skipped(SkipReason),
    /// Reply could not be delivered. The event is dropped.
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub replied: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl PipelineStats {
    fn record(&mut self, outcome: &EventOutcome) {
        self.received += 1;
        match outcome {
            EventOutcome::Replied { .. } => self.replied += 1,
            EventOutcome::Skipped(_) => self.skipped += 1,
            EventOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Gate, extract, look up, format, reply. One event at a time.
pub struct Pipeline {
    extractor: Extractor,
    gate: EventGate,
    formatter: ReplyFormatter,
    cache: Arc<CatalogCache>,
    stream: ResilientStream,
    shutdown: watch::Receiver<bool>,
    phrases: PhraseSet,
    recent: IndexSet<String>,
    recent_capacity: usize,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        cache: Arc<CatalogCache>,
        stream: ResilientStream,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let extractor = Extractor::new(config.extractor)?;
        let formatter = ReplyFormatter::for_identity(&config.bot_identity, config.max_reply_records);
        let gate = EventGate::new(config.bot_identity, config.blocklist);

        Ok(Self {
            extractor,
            gate,
            formatter,
            cache,
            stream,
            shutdown,
            phrases: PhraseSet::default(),
            recent: IndexSet::new(),
            recent_capacity: config.recent_event_capacity.max(1),
            stats: PipelineStats::default(),
        })
    }

    #[must_use]
    pub const fn stats(&self) -> PipelineStats {
        self.stats
    }

    #[must_use]
    pub const fn stream(&self) -> &ResilientStream {
        &self.stream
    }

    /// Consumes the stream until shutdown, end of stream, or a fatal error.
    /// Per-event failures are counted and never end the loop.
    pub async fn run(&mut self) -> Result<PipelineStats> {
        tracing::info!(identity = self.gate.bot_identity(), "Pipeline started");

        loop {
            if *self.shutdown.borrow() {
                tracing::info!("Shutdown requested");
                break;
            }

            let next = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown requested");
                        break;
                    }
                    continue;
                }
                next = self.stream.next_event() => next,
            };

            match next {
                Ok(Some(event)) => {
                    let outcome = match self.process_event(&event).await {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_fatal() => {
                            tracing::error!(event_id = %event.id, error = %e, "Fatal error, stopping");
                            return Err(e);
                        }
                        Err(e) => EventOutcome::Failed(e.to_string()),
                    };
                    self.stats.record(&outcome);
                }
                Ok(None) => break,
                Err(DeliveryError::Cancelled { .. }) => {
                    tracing::info!("Stream cancelled by shutdown");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Event stream lost");
                    return Err(e.into());
                }
            }
        }

        let cache = self.cache.stats().await;
        tracing::info!(
            received = self.stats.received,
            replied = self.stats.replied,
            skipped = self.stats.skipped,
            failed = self.stats.failed,
            cache_hits = cache.hits,
            cache_misses = cache.misses,
            "Pipeline stopped"
        );
        Ok(self.stats)
    }

    /// Runs one event through the pipeline. Only a fatal delivery failure is
    /// returned as an error.
    pub async fn process_event(&mut self, event: &InboundEvent) -> Result<EventOutcome> {
        if !self.gate.should_process(event) {
            tracing::trace!(event_id = %event.id, "Event gated");
            return Ok(EventOutcome::Skipped(SkipReason::Gated));
        }
        if !self.remember(&event.id) {
            tracing::debug!(event_id = %event.id, "Event already handled");
            return Ok(EventOutcome::Skipped(SkipReason::AlreadyHandled));
        }

        self.refresh_phrases().await;

        let body = event.body.as_deref().unwrap_or_default();
        let matches = self.extractor.extract(body, &self.phrases);
        if matches.is_empty() {
            return Ok(EventOutcome::Skipped(SkipReason::NoMatches));
        }
        tracing::debug!(event_id = %event.id, matched = matches.len(), "Found references");

        let records = self.lookup(&event.id, matches.iter()).await;
        if records.is_empty() {
            return Ok(EventOutcome::Skipped(SkipReason::NoRecords));
        }

        let reply = self.formatter.format(&records);
        if reply.is_empty() {
            return Ok(EventOutcome::Skipped(SkipReason::NoRecords));
        }

        match self.stream.reply_to(event, &reply.text).await {
            Ok(()) => {
                tracing::info!(
                    event_id = %event.id,
                    matched = matches.len(),
                    resolved = reply.rendered,
                    "Replied"
                );
                Ok(EventOutcome::Replied {
                    matched: matches.len(),
                    resolved: reply.rendered,
                })
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "Reply not delivered");
                Ok(EventOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn refresh_phrases(&mut self) {
        match self.cache.list_names().await {
            Ok(names) => self.phrases = self.extractor.phrases(&names),
            Err(e) => tracing::warn!(
                error = %e,
                phrases = self.phrases.len(),
                "Catalog names unavailable, using last known set"
            ),
        }
    }

    async fn lookup<'a>(
        &self,
        event_id: &str,
        names: impl Iterator<Item = &'a str>,
    ) -> Vec<EntityRecord> {
        let mut records = Vec::new();
        for name in names {
            match self.cache.get_by_name(name).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => tracing::debug!(event_id, name, "Name no longer in catalog"),
                Err(e) => tracing::warn!(event_id, name, error = %e, "Lookup failed, dropping name"),
            }
        }
        records
    }

    /// Returns false if the id was already seen.
    fn remember(&mut self, event_id: &str) -> bool {
        if self.recent.contains(event_id) {
            return false;
        }
        if self.recent.len() >= self.recent_capacity {
            self.recent.shift_remove_index(0);
        }
        self.recent.insert(event_id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::*;
    use crate::catalog::{CatalogStore, MemoryCatalogStore, StoreError, StoreResult};
    use crate::delivery::{EventFeed, Fault, MemoryRelay, RetryPolicy, StreamSource};

    const BOT: &str = "jokerbot";

    fn steel_joker() -> EntityRecord {
        EntityRecord::new(
            "Steel Joker",
            "Gives X0.2 Mult for each Steel Card in your full deck",
            "Uncommon",
            "$7",
            "Available from start",
        )
    }

    fn blueprint() -> EntityRecord {
        EntityRecord::new(
            "Blueprint",
            "Copies ability of Joker to the right",
            "Rare",
            "$10",
            "Available from start",
        )
    }

    fn comment(id: &str, author: &str, body: &str) -> InboundEvent {
        InboundEvent::new(id, author, body)
    }

    /// Memory store whose reads can be made to fail.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryCatalogStore,
        fail_list: AtomicBool,
        failing_gets: Mutex<HashSet<String>>,
    }

    impl ScriptedStore {
        fn with_records(records: impl IntoIterator<Item = EntityRecord>) -> Self {
            Self {
                inner: MemoryCatalogStore::with_records(records),
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl CatalogStore for ScriptedStore {
        async fn get(&self, name: &str) -> StoreResult<Option<EntityRecord>> {
            if self.failing_gets.lock().await.contains(name) {
                return Err(StoreError::Unavailable("connection lost".into()));
            }
            self.inner.get(name).await
        }

        async fn list(&self) -> StoreResult<Vec<String>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection lost".into()));
            }
            self.inner.list().await
        }

        async fn upsert(&self, record: &EntityRecord) -> StoreResult<()> {
            self.inner.upsert(record).await
        }

        async fn delete(&self, name: &str) -> StoreResult<bool> {
            self.inner.delete(name).await
        }
    }

    struct Harness {
        pipeline: Pipeline,
        relay: Arc<MemoryRelay>,
        store: Arc<ScriptedStore>,
        shutdown: watch::Sender<bool>,
    }

    fn harness(records: Vec<EntityRecord>, relay: MemoryRelay) -> Harness {
        harness_with(records, relay, PipelineConfig {
            bot_identity: BOT.to_string(),
            blocklist: vec!["AutoModerator".to_string()],
            ..PipelineConfig::default()
        })
    }

    fn harness_with(records: Vec<EntityRecord>, relay: MemoryRelay, config: PipelineConfig) -> Harness {
        let store = Arc::new(ScriptedStore::with_records(records));
        let cache = Arc::new(CatalogCache::new(store.clone(), 64));
        let relay = Arc::new(relay);
        let (shutdown, rx) = watch::channel(false);
        let policy = RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(300));
        let stream = ResilientStream::new(relay.clone(), relay.clone(), policy, rx.clone());
        let pipeline = Pipeline::new(config, cache, stream, rx).unwrap();

        Harness {
            pipeline,
            relay,
            store,
            shutdown,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_reference_gets_formatted_reply() {
        let mut h = harness(vec![steel_joker(), blueprint()], MemoryRelay::new());
        let event = comment("c1", "player_one", "I love [[Steel Joker]]");

        let outcome = h.pipeline.process_event(&event).await.unwrap();

        assert_eq!(outcome, EventOutcome::Replied { matched: 1, resolved: 1 });
        let replies = h.relay.replies().await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, "c1");
        assert_eq!(
            replies[0].1,
            "[[Steel Joker]]: Cost: $7, Rarity: Uncommon\\\n\
             Effect: Gives X0.2 Mult for each Steel Card in your full deck\\\n\
             Availability: Available from start\n\n\
             This comment brought to you by your friendly, neighborhood u/jokerbot"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_references_reply_in_order_of_appearance() {
        let mut h = harness(vec![steel_joker(), blueprint()], MemoryRelay::new());
        let event = comment("c1", "player_one", "[[blueprint]] then \\[\\[STEEL JOKER\\]\\] and [[Blueprint]]");

        let outcome = h.pipeline.process_event(&event).await.unwrap();

        assert_eq!(outcome, EventOutcome::Replied { matched: 2, resolved: 2 });
        let text = &h.relay.replies().await[0].1;
        let blueprint_at = text.find("[[Blueprint]]").unwrap();
        let steel_at = text.find("[[Steel Joker]]").unwrap();
        assert!(blueprint_at < steel_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_and_blocklisted_comments_are_gated() {
        let mut h = harness(vec![steel_joker()], MemoryRelay::new());

        for event in [
            comment("c1", "JokerBot", "[[Steel Joker]]"),
            comment("c2", "automoderator", "[[Steel Joker]]"),
            InboundEvent {
                author: None,
                ..comment("c3", "x", "[[Steel Joker]]")
            },
        ] {
            let outcome = h.pipeline.process_event(&event).await.unwrap();
            assert_eq!(outcome, EventOutcome::Skipped(SkipReason::Gated));
        }
        assert_eq!(h.relay.send_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_comment_has_no_matches() {
        let mut h = harness(vec![steel_joker()], MemoryRelay::new());
        let event = comment("c1", "player_one", "Steel Joker is great with Blueprint");

        let outcome = h.pipeline.process_event(&event).await.unwrap();

        assert_eq!(outcome, EventOutcome::Skipped(SkipReason::NoMatches));
        assert_eq!(h.relay.send_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_names_are_not_matches() {
        let mut h = harness(vec![steel_joker()], MemoryRelay::new());
        let event = comment("c1", "player_one", "what about [[Gold Joker]]?");

        let outcome = h.pipeline.process_event(&event).await.unwrap();

        assert_eq!(outcome, EventOutcome::Skipped(SkipReason::NoMatches));
        assert_eq!(h.relay.send_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_event_is_answered_once() {
        let mut h = harness(vec![steel_joker()], MemoryRelay::new());
        let event = comment("c1", "player_one", "[[Steel Joker]]");

        h.pipeline.process_event(&event).await.unwrap();
        let second = h.pipeline.process_event(&event).await.unwrap();

        assert_eq!(second, EventOutcome::Skipped(SkipReason::AlreadyHandled));
        assert_eq!(h.relay.replies().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_drops_only_that_name() {
        let mut h = harness(vec![steel_joker(), blueprint()], MemoryRelay::new());
        h.store.failing_gets.lock().await.insert("blueprint".to_string());
        let event = comment("c1", "player_one", "[[Blueprint]] [[Steel Joker]]");

        let outcome = h.pipeline.process_event(&event).await.unwrap();

        assert_eq!(outcome, EventOutcome::Replied { matched: 2, resolved: 1 });
        assert!(!h.relay.replies().await[0].1.contains("Blueprint"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resolved_records_means_no_reply() {
        let mut h = harness(vec![blueprint()], MemoryRelay::new());
        h.store.failing_gets.lock().await.insert("blueprint".to_string());
        let event = comment("c1", "player_one", "[[Blueprint]]");

        let outcome = h.pipeline.process_event(&event).await.unwrap();

        assert_eq!(outcome, EventOutcome::Skipped(SkipReason::NoRecords));
        assert_eq!(h.relay.send_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_record_is_not_rendered() {
        let broken = EntityRecord {
            cost: "$1000000".into(),
            ..blueprint()
        };
        let mut h = harness(vec![broken], MemoryRelay::new());
        let event = comment("c1", "player_one", "[[Blueprint]]");

        let outcome = h.pipeline.process_event(&event).await.unwrap();

        assert_eq!(outcome, EventOutcome::Skipped(SkipReason::NoRecords));
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_list_outage_reuses_last_phrases() {
        let mut h = harness(vec![steel_joker()], MemoryRelay::new());
        h.pipeline
            .process_event(&comment("c1", "player_one", "[[Steel Joker]]"))
            .await
            .unwrap();

        h.store.fail_list.store(true, Ordering::SeqCst);
        let outcome = h
            .pipeline
            .process_event(&comment("c2", "player_one", "[[Steel Joker]] again"))
            .await
            .unwrap();

        assert!(matches!(outcome, EventOutcome::Replied { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_writes_are_seen_by_next_event() {
        let mut h = harness(vec![], MemoryRelay::new());
        let event = comment("c1", "player_one", "[[Blueprint]]");
        assert_eq!(
            h.pipeline.process_event(&event).await.unwrap(),
            EventOutcome::Skipped(SkipReason::NoMatches)
        );

        h.pipeline.cache.upsert(&blueprint()).await.unwrap();
        let outcome = h
            .pipeline
            .process_event(&comment("c2", "player_one", "[[Blueprint]]"))
            .await
            .unwrap();

        assert_eq!(outcome, EventOutcome::Replied { matched: 1, resolved: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reply_fails_event_and_run_continues() {
        let relay = MemoryRelay::with_events([
            comment("c1", "player_one", "[[Steel Joker]]"),
            comment("c2", "player_two", "[[Steel Joker]]"),
        ]);
        let mut h = harness(vec![steel_joker()], relay);
        for _ in 0..4 {
            h.relay.push_reply_fault(Fault::transient("503")).await;
        }

        let stats = h.pipeline.run().await.unwrap();

        assert_eq!(
            stats,
            PipelineStats {
                received: 2,
                replied: 1,
                skipped: 0,
                failed: 1
            }
        );
        assert_eq!(h.relay.replies().await[0].0, "c2");
        assert_eq!(h.relay.send_calls().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_reply_fails_only_that_event() {
        let relay = MemoryRelay::with_events([
            comment("c1", "player_one", "[[Steel Joker]]"),
            comment("c2", "player_two", "[[Steel Joker]]"),
        ]);
        let mut h = harness(vec![steel_joker()], relay);
        h.relay.push_reply_fault(Fault::rejected("404 Not Found")).await;

        let stats = h.pipeline.run().await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.replied, 1);
        assert_eq!(h.relay.send_calls().await, 2);
        assert_eq!(h.relay.replies().await[0].0, "c2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_reply_stops_run() {
        let relay = MemoryRelay::with_events([
            comment("c1", "player_one", "[[Steel Joker]]"),
            comment("c2", "player_two", "[[Steel Joker]]"),
        ]);
        let mut h = harness(vec![steel_joker()], relay);
        h.relay.push_reply_fault(Fault::fatal("403 Forbidden")).await;

        let err = h.pipeline.run().await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(h.relay.send_calls().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_counts_every_outcome() {
        let relay = MemoryRelay::with_events([
            comment("c1", "player_one", "[[Steel Joker]]"),
            comment("c2", BOT, "[[Steel Joker]]"),
            comment("c3", "player_two", "nothing here"),
        ]);
        let mut h = harness(vec![steel_joker()], relay);

        let stats = h.pipeline.run().await.unwrap();

        assert_eq!(stats.received, 3);
        assert_eq!(stats.replied, 1);
        assert_eq!(stats.skipped, 2);
    }

    struct SilentSource;
    struct SilentFeed;

    #[async_trait::async_trait]
    impl EventFeed for SilentFeed {
        async fn next(&mut self) -> std::result::Result<Option<InboundEvent>, Fault> {
            std::future::pending().await
        }
    }

    #[async_trait::async_trait]
    impl StreamSource for SilentSource {
        async fn open(&self) -> std::result::Result<Box<dyn EventFeed>, Fault> {
            Ok(Box::new(SilentFeed))
        }

        async fn fetch(&self, _event_id: &str) -> std::result::Result<Option<InboundEvent>, Fault> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_idle_run() {
        let store = Arc::new(MemoryCatalogStore::new());
        let cache = Arc::new(CatalogCache::new(store, 16));
        let (tx, rx) = watch::channel(false);
        let stream = ResilientStream::new(
            Arc::new(SilentSource),
            Arc::new(MemoryRelay::new()),
            RetryPolicy::default(),
            rx.clone(),
        );
        let mut pipeline = Pipeline::new(PipelineConfig::default(), cache, stream, rx).unwrap();

        let handle = tokio::spawn(async move { pipeline.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats, PipelineStats::default());
    }

    #[test]
    fn test_bad_pattern_is_fatal() {
        let store = Arc::new(MemoryCatalogStore::new());
        let cache = Arc::new(CatalogCache::new(store, 16));
        let (_tx, rx) = watch::channel(false);
        let relay = Arc::new(MemoryRelay::new());
        let stream = ResilientStream::new(relay.clone(), relay, RetryPolicy::default(), rx.clone());
        let config = PipelineConfig {
            extractor: ExtractorConfig {
                pattern: "[[(".to_string(),
                ..ExtractorConfig::default()
            },
            ..PipelineConfig::default()
        };

        let err = Pipeline::new(config, cache, stream, rx).err().unwrap();

        assert!(err.is_fatal());
    }
}
