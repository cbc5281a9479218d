use crate::record::EntityRecord;

pub const DEFAULT_MAX_REPLY_RECORDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedReply {
    pub text: String,
    /// Records that made it into `text`
    pub rendered: usize,
    /// Records dropped for failing validation
    pub skipped: usize,
}

impl FormattedReply {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rendered == 0
    }
}

/// Renders catalog records as a markdown reply.
#[derive(Debug, Clone)]
pub struct ReplyFormatter {
    max_records: usize,
    signature: String,
}

impl ReplyFormatter {
    pub fn new(max_records: usize, signature: impl Into<String>) -> Self {
        Self {
            max_records,
            signature: signature.into(),
        }
    }

    /// Formatter that signs replies as the given account.
    #[must_use]
    pub fn for_identity(identity: &str, max_records: usize) -> Self {
        Self::new(
            max_records,
            format!("This comment brought to you by your friendly, neighborhood u/{identity}"),
        )
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    #[must_use]
    pub fn format(&self, records: &[EntityRecord]) -> FormattedReply {
        let mut blocks = Vec::new();
        let mut skipped = 0;

        for record in records.iter().take(self.max_records) {
            if let Err(e) = record.validate() {
                tracing::warn!(name = %record.name, error = %e, "Skipping malformed record");
                skipped += 1;
                continue;
            }
            blocks.push(render_record(record));
        }

        if records.len() > self.max_records {
            tracing::debug!(
                dropped = records.len() - self.max_records,
                "Reply truncated to max records"
            );
        }

        let rendered = blocks.len();
        let text = if blocks.is_empty() {
            String::new()
        } else {
            blocks.push(self.signature.clone());
            blocks.join("\n\n")
        };

        FormattedReply {
            text,
            rendered,
            skipped,
        }
    }
}

/// Trailing backslashes are markdown hard line breaks.
fn render_record(record: &EntityRecord) -> String {
    format!(
        "[[{}]]: Cost: {}, Rarity: {}\\\nEffect: {}\\\nAvailability: {}",
        record.name.trim(),
        record.cost.trim(),
        record.rarity.trim(),
        record.effect.trim(),
        record.availability.trim(),
    )
}
