use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_RARITY_LEN: usize = 10;
pub const MAX_COST_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("field `{field}` is {len} characters (max: {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Lookup key for an entity name: surrounding whitespace removed, lower-cased.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A catalog item that comments can reference by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub effect: String,
    pub rarity: String,
    pub cost: String,
    pub availability: String,
}

impl EntityRecord {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        effect: impl Into<String>,
        rarity: impl Into<String>,
        cost: impl Into<String>,
        availability: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            effect: effect.into(),
            rarity: rarity.into(),
            cost: cost.into(),
            availability: availability.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Copy of the record with whitespace trimmed from every field.
    #[must_use]
    pub fn trimmed(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            effect: self.effect.trim().to_string(),
            rarity: self.rarity.trim().to_string(),
            cost: self.cost.trim().to_string(),
            availability: self.availability.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_field("name", &self.name, Some(MAX_NAME_LEN))?;
        check_field("effect", &self.effect, None)?;
        check_field("rarity", &self.rarity, Some(MAX_RARITY_LEN))?;
        check_field("cost", &self.cost, Some(MAX_COST_LEN))?;
        check_field("availability", &self.availability, None)?;
        Ok(())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

fn check_field(field: &'static str, value: &str, max: Option<usize>) -> Result<(), ValidationError> {
    let len = value.trim().chars().count();
    if len == 0 {
        return Err(ValidationError::EmptyField(field));
    }
    match max {
        Some(max) if len > max => Err(ValidationError::TooLong { field, len, max }),
        _ => Ok(()),
    }
}

/// A comment received from the stream. Author and body may be absent for
/// deleted or removed comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    #[must_use]
    pub fn new(id: impl Into<String>, author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: Some(author.into()),
            body: Some(body.into()),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
