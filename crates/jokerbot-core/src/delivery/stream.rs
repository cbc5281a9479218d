use std::sync::Arc;

use tokio::sync::watch;

use super::retry::{wait_backoff, DeliveryError, Fault, FaultKind, RetryPolicy};
use crate::record::InboundEvent;

/// Opens live event feeds on the platform.
#[async_trait::async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn EventFeed>, Fault>;

    /// Fetches a single event by id. `Ok(None)` when it does not exist.
    async fn fetch(&self, event_id: &str) -> Result<Option<InboundEvent>, Fault>;
}

#[async_trait::async_trait]
pub trait EventFeed: Send + Sync {
    /// Next event in arrival order. `Ok(None)` is the end of the stream.
    async fn next(&mut self) -> Result<Option<InboundEvent>, Fault>;
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn send(&self, event_id: &str, text: &str) -> Result<(), Fault>;
}

/// Event stream and reply channel wrapped in the backoff envelope.
///
/// A fault while reading drops the current feed and opens a new one. Events
/// that arrive between the fault and the reopen may be missed or delivered
/// twice, depending on the source.
pub struct ResilientStream {
    source: Arc<dyn StreamSource>,
    publisher: Arc<dyn Publisher>,
    policy: RetryPolicy,
    cancel: watch::Receiver<bool>,
    feed: Option<Box<dyn EventFeed>>,
    /// Stream faults since the last delivered event
    drops: u32,
}

impl ResilientStream {
    pub fn new(
        source: Arc<dyn StreamSource>,
        publisher: Arc<dyn Publisher>,
        policy: RetryPolicy,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            publisher,
            policy,
            cancel,
            feed: None,
            drops: 0,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn next_event(&mut self) -> Result<Option<InboundEvent>, DeliveryError> {
        loop {
            if self.feed.is_none() {
                let feed = self.open_feed().await?;
                self.feed = Some(feed);
            }
            let Some(feed) = self.feed.as_mut() else {
                continue;
            };

            match feed.next().await {
                Ok(Some(event)) => {
                    self.drops = 0;
                    return Ok(Some(event));
                }
                Ok(None) => {
                    tracing::info!("Event stream ended");
                    self.feed = None;
                    return Ok(None);
                }
                Err(fault) => {
                    self.feed = None;
                    self.reconnect_after(fault).await?;
                }
            }
        }
    }

    pub async fn reply_to(&self, event: &InboundEvent, text: &str) -> Result<(), DeliveryError> {
        let publisher = &self.publisher;
        let result = self
            .policy
            .run("send reply", Some(&self.cancel), || async move {
                publisher.send(&event.id, text).await
            })
            .await;

        if result.is_ok() {
            tracing::debug!(event_id = %event.id, "Reply sent");
        }
        result
    }

    pub async fn fetch_event(&self, event_id: &str) -> Result<Option<InboundEvent>, DeliveryError> {
        let source = &self.source;
        self.policy
            .run("fetch event", Some(&self.cancel), || async move {
                source.fetch(event_id).await
            })
            .await
    }

    async fn open_feed(&self) -> Result<Box<dyn EventFeed>, DeliveryError> {
        let source = &self.source;
        let feed = self
            .policy
            .run("open event stream", Some(&self.cancel), || async move {
                source.open().await
            })
            .await?;
        tracing::info!("Event stream opened");
        Ok(feed)
    }

    async fn reconnect_after(&mut self, fault: Fault) -> Result<(), DeliveryError> {
        const OPERATION: &str = "read event stream";

        if !fault.is_retryable() {
            tracing::error!(fault = %fault, "Event stream failed without retry");
            let operation = OPERATION.to_string();
            return Err(if fault.kind == FaultKind::Rejected {
                DeliveryError::Rejected { operation, fault }
            } else {
                DeliveryError::Fatal { operation, fault }
            });
        }

        self.drops += 1;
        if self.drops > self.policy.max_retries {
            tracing::error!(drops = self.drops, fault = %fault, "Event stream keeps dropping");
            return Err(DeliveryError::Exhausted {
                operation: OPERATION.to_string(),
                attempts: self.drops,
                last: fault,
            });
        }

        let delay = self.policy.delay_for(self.drops - 1);
        tracing::warn!(
            attempt = self.drops,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            fault = %fault,
            "Event stream dropped, reconnecting"
        );
        if wait_backoff(delay, Some(&mut self.cancel)).await {
            Ok(())
        } else {
            Err(DeliveryError::Cancelled {
                operation: OPERATION.to_string(),
            })
        }
    }
}
