use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::config::RelayConfig;
use super::retry::{Fault, FaultKind};
use super::stream::{EventFeed, Publisher, StreamSource};
use crate::record::InboundEvent;

/// Maps a non-success relay status onto the retry classification. Only
/// credential failures are fatal; any other refusal concerns the single
/// request that got it.
#[must_use]
pub fn classify_status(status: StatusCode) -> FaultKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FaultKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT => FaultKind::Transient,
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::PROXY_AUTHENTICATION_REQUIRED => FaultKind::Fatal,
        s if s.is_server_error() => FaultKind::Transient,
        _ => FaultKind::Rejected,
    }
}

fn request_fault(err: &reqwest::Error) -> Fault {
    if let Some(status) = err.status() {
        return Fault::new(classify_status(status), err.to_string());
    }
    if err.is_builder() {
        return Fault::fatal(err.to_string());
    }
    // connect, timeout, truncated body
    Fault::transient(err.to_string())
}

fn url_fault(err: url::ParseError) -> Fault {
    Fault::fatal(format!("invalid relay URL: {err}"))
}

#[derive(Debug, Deserialize)]
struct CursorResponse {
    cursor: String,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    events: Vec<InboundEvent>,
    cursor: String,
    /// Set once the relay will never deliver another event
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Serialize)]
struct ReplyBody<'a> {
    text: &'a str,
}

#[derive(Debug, Clone)]
struct RelayClient {
    client: Client,
    config: Arc<RelayConfig>,
}

impl RelayClient {
    fn new(config: RelayConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(u64::from(config.connect_timeout_seconds)))
            .timeout(Duration::from_secs(u64::from(config.request_timeout_seconds)))
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.config.token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn event_url(&self, event_id: &str, suffix: Option<&str>) -> Result<Url, Fault> {
        let mut url = self.config.endpoint("events").map_err(url_fault)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| Fault::fatal("relay URL cannot carry a path"))?;
            segments.push(event_id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, Fault> {
        let response = self.send(builder).await?;
        Self::check(response).await
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, Fault> {
        self.authorized(builder)
            .send()
            .await
            .map_err(|e| request_fault(&e))
    }

    async fn check(response: Response) -> Result<Response, Fault> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Fault::new(classify_status(status), format!("{status}: {body}")))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, Fault> {
        response.json().await.map_err(|e| request_fault(&e))
    }
}

/// Event source backed by the relay's polling API.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    relay: RelayClient,
}

impl HttpEventSource {
    pub fn new(config: RelayConfig) -> reqwest::Result<Self> {
        Ok(Self {
            relay: RelayClient::new(config)?,
        })
    }
}

#[async_trait::async_trait]
impl StreamSource for HttpEventSource {
    async fn open(&self) -> Result<Box<dyn EventFeed>, Fault> {
        let url = self.relay.config.endpoint("events/cursor").map_err(url_fault)?;
        let response = self.relay.execute(self.relay.client.get(url)).await?;
        let CursorResponse { cursor } = RelayClient::json(response).await?;

        tracing::debug!(cursor = %cursor, "Relay cursor acquired");
        Ok(Box::new(HttpFeed {
            relay: self.relay.clone(),
            cursor,
            buffer: VecDeque::new(),
            closed: false,
            idle: false,
        }))
    }

    async fn fetch(&self, event_id: &str) -> Result<Option<InboundEvent>, Fault> {
        let url = self.relay.event_url(event_id, None)?;
        let response = self.relay.send(self.relay.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = RelayClient::check(response).await?;
        RelayClient::json(response).await.map(Some)
    }
}

struct HttpFeed {
    relay: RelayClient,
    cursor: String,
    buffer: VecDeque<InboundEvent>,
    closed: bool,
    /// Last poll came back empty
    idle: bool,
}

impl HttpFeed {
    async fn poll(&mut self) -> Result<(), Fault> {
        let url = self.relay.config.endpoint("events").map_err(url_fault)?;
        let limit = self.relay.config.batch_limit.to_string();
        let request = self
            .relay
            .client
            .get(url)
            .query(&[("after", self.cursor.as_str()), ("limit", limit.as_str())]);

        let page: EventPage = RelayClient::json(self.relay.execute(request).await?).await?;

        tracing::trace!(events = page.events.len(), cursor = %page.cursor, "Polled relay");
        self.idle = page.events.is_empty();
        self.cursor = page.cursor;
        self.closed = page.closed;
        self.buffer.extend(page.events);
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventFeed for HttpFeed {
    async fn next(&mut self) -> Result<Option<InboundEvent>, Fault> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Some(event));
            }
            if self.closed {
                return Ok(None);
            }
            if self.idle {
                tokio::time::sleep(self.relay.config.poll_interval()).await;
            }
            self.poll().await?;
        }
    }
}

/// Posts replies to the relay.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    relay: RelayClient,
}

impl HttpPublisher {
    pub fn new(config: RelayConfig) -> reqwest::Result<Self> {
        Ok(Self {
            relay: RelayClient::new(config)?,
        })
    }
}

#[async_trait::async_trait]
impl Publisher for HttpPublisher {
    async fn send(&self, event_id: &str, text: &str) -> Result<(), Fault> {
        let url = self.relay.event_url(event_id, Some("replies"))?;
        let request = self
            .relay
            .client
            .post(url)
            // one reply per event, however many times the post is retried
            .header("Idempotency-Key", format!("reply-{event_id}"))
            .json(&ReplyBody { text });

        self.relay.execute(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FaultKind::RateLimited);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), FaultKind::Transient);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FaultKind::Transient);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), FaultKind::Transient);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), FaultKind::Fatal);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), FaultKind::Fatal);
        assert_eq!(
            classify_status(StatusCode::PROXY_AUTHENTICATION_REQUIRED),
            FaultKind::Fatal
        );
    }

    #[test]
    fn test_request_specific_refusals_are_rejected() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::CONFLICT,
            StatusCode::GONE,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            assert_eq!(classify_status(status), FaultKind::Rejected, "{status}");
        }
    }

    #[test]
    fn test_event_url_escapes_id() {
        let config = RelayConfig::new(Url::parse("http://relay.local/api").unwrap());
        let relay = RelayClient::new(config).unwrap();

        let url = relay.event_url("t1/abc", Some("replies")).unwrap();

        assert_eq!(url.as_str(), "http://relay.local/api/events/t1%2Fabc/replies");
    }

    #[test]
    fn test_page_without_events() {
        let page: EventPage = serde_json::from_str(r#"{"cursor": "c9"}"#).unwrap();
        assert!(page.events.is_empty());
        assert!(!page.closed);
    }
}
