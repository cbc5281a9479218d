use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

use super::retry::Fault;
use super::stream::{EventFeed, Publisher, StreamSource};
use crate::record::InboundEvent;

type Session = Vec<Result<InboundEvent, Fault>>;

#[derive(Debug, Default)]
struct RelayState {
    sessions: VecDeque<Result<Session, Fault>>,
    events: HashMap<String, InboundEvent>,
    reply_faults: VecDeque<Fault>,
    replies: Vec<(String, String)>,
    open_calls: u32,
    send_calls: u32,
}

/// In-process relay driven by scripted sessions. Each `open` consumes the
/// next session; once they run out, feeds end immediately.
#[derive(Debug, Default)]
pub struct MemoryRelay {
    state: Mutex<RelayState>,
}

impl MemoryRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay with a single session that yields `events` and then ends.
    pub fn with_events(events: impl IntoIterator<Item = InboundEvent>) -> Self {
        let mut relay = Self::new();
        relay
            .state
            .get_mut()
            .push_session(events.into_iter().map(Ok).collect());
        relay
    }

    pub async fn push_session(&self, items: Vec<Result<InboundEvent, Fault>>) {
        self.state.lock().await.push_session(items);
    }

    /// Makes the next `open` fail with `fault`.
    pub async fn push_open_fault(&self, fault: Fault) {
        self.state.lock().await.sessions.push_back(Err(fault));
    }

    /// Makes the next `send` fail with `fault`.
    pub async fn push_reply_fault(&self, fault: Fault) {
        self.state.lock().await.reply_faults.push_back(fault);
    }

    /// Replies accepted so far, as `(event_id, text)`.
    pub async fn replies(&self) -> Vec<(String, String)> {
        self.state.lock().await.replies.clone()
    }

    pub async fn open_calls(&self) -> u32 {
        self.state.lock().await.open_calls
    }

    pub async fn send_calls(&self) -> u32 {
        self.state.lock().await.send_calls
    }
}

impl RelayState {
    fn push_session(&mut self, items: Session) {
        for event in items.iter().flatten() {
            self.events.insert(event.id.clone(), event.clone());
        }
        self.sessions.push_back(Ok(items));
    }
}

struct MemoryFeed {
    items: VecDeque<Result<InboundEvent, Fault>>,
}

#[async_trait::async_trait]
impl EventFeed for MemoryFeed {
    async fn next(&mut self) -> Result<Option<InboundEvent>, Fault> {
        self.items.pop_front().transpose()
    }
}

#[async_trait::async_trait]
impl StreamSource for MemoryRelay {
    async fn open(&self) -> Result<Box<dyn EventFeed>, Fault> {
        let mut state = self.state.lock().await;
        state.open_calls += 1;

        let items = state.sessions.pop_front().unwrap_or_else(|| Ok(Vec::new()))?;
        Ok(Box::new(MemoryFeed {
            items: items.into(),
        }))
    }

    async fn fetch(&self, event_id: &str) -> Result<Option<InboundEvent>, Fault> {
        Ok(self.state.lock().await.events.get(event_id).cloned())
    }
}

#[async_trait::async_trait]
impl Publisher for MemoryRelay {
    async fn send(&self, event_id: &str, text: &str) -> Result<(), Fault> {
        let mut state = self.state.lock().await;
        state.send_calls += 1;

        if let Some(fault) = state.reply_faults.pop_front() {
            return Err(fault);
        }
        state.replies.push((event_id.to_string(), text.to_string()));
        Ok(())
    }
}
