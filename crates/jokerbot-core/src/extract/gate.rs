use std::collections::HashSet;

use crate::record::{normalize_name, InboundEvent};

/// Decides whether an event is worth scanning at all. Anything that cannot be
/// confirmed as a real comment from another user is rejected.
#[must_use]
pub fn should_process<S: AsRef<str>>(
    event: &InboundEvent,
    bot_identity: &str,
    blocklist: &[S],
) -> bool {
    let Some(author) = non_blank(event.author.as_deref()) else {
        return false;
    };
    if non_blank(event.body.as_deref()).is_none() {
        return false;
    }
    let author = normalize_name(author);
    if author == normalize_name(bot_identity) {
        return false;
    }
    !blocklist
        .iter()
        .any(|blocked| author == normalize_name(blocked.as_ref()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct EventGate {
    bot_identity: String,
    blocklist: HashSet<String>,
}

impl EventGate {
    pub fn new<I, S>(bot_identity: impl Into<String>, blocklist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            bot_identity: bot_identity.into(),
            blocklist: blocklist
                .into_iter()
                .map(|user| normalize_name(user.as_ref()))
                .filter(|user| !user.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn bot_identity(&self) -> &str {
        &self.bot_identity
    }

    #[must_use]
    pub fn should_process(&self, event: &InboundEvent) -> bool {
        let allowed = should_process(event, &self.bot_identity, &[] as &[&str]);
        allowed
            && event
                .author
                .as_deref()
                .is_some_and(|author| !self.blocklist.contains(&normalize_name(author)))
    }
}
