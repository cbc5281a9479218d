use std::collections::HashSet;

use indexmap::IndexSet;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Matches `[[text]]` as well as the markdown-escaped `\[\[text\]\]`.
pub const DEFAULT_MATCH_PATTERN: &str = r"\\?\[\\?\[(.*?)\\?\]\\?\]";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Invalid match pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("Match pattern has no capture group: {0}")]
    MissingCaptureGroup(String),
    #[error("max_matches must be at least 1")]
    ZeroMaxMatches,
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Regex whose first capture group is the referenced name
    pub pattern: String,
    pub ignore_case: bool,
    pub strip_whitespace: bool,
    /// Hard cap on accepted references per text
    pub max_matches: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_MATCH_PATTERN.to_string(),
            ignore_case: true,
            strip_whitespace: true,
            max_matches: 10,
        }
    }
}

/// Catalog names normalized the same way candidates are, so membership is a
/// plain set lookup.
#[derive(Debug, Clone, Default)]
pub struct PhraseSet {
    phrases: HashSet<String>,
}

impl PhraseSet {
    #[must_use]
    pub fn contains(&self, candidate: &str) -> bool {
        self.phrases.contains(candidate)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Names found in one text, in order of first appearance, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    names: IndexSet<String>,
}

impl MatchSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the name was already present.
    pub fn insert(&mut self, name: String) -> bool {
        self.names.insert(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.names.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a MatchSet {
    type Item = &'a String;
    type IntoIter = indexmap::set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.iter()
    }
}

pub struct Extractor {
    config: ExtractorConfig,
    pattern: Regex,
}

impl Extractor {
    /// Compiles the match grammar. A grammar that cannot be used is rejected
    /// here rather than when the first comment arrives.
    pub fn new(config: ExtractorConfig) -> ExtractionResult<Self> {
        if config.max_matches == 0 {
            return Err(ExtractionError::ZeroMaxMatches);
        }

        let pattern = RegexBuilder::new(&config.pattern)
            .case_insensitive(config.ignore_case)
            .build()?;

        if pattern.captures_len() < 2 {
            return Err(ExtractionError::MissingCaptureGroup(config.pattern));
        }

        Ok(Self { config, pattern })
    }

    #[must_use]
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Normalizes a catalog name list into the set `extract` compares against.
    pub fn phrases<I, S>(&self, names: I) -> PhraseSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = names
            .into_iter()
            .map(|name| self.normalize(name.as_ref()))
            .filter(|name| !name.is_empty())
            .collect();
        PhraseSet { phrases }
    }

    /// Finds catalog references in `text`. Only exact (normalized) matches are
    /// accepted, and scanning stops as soon as `max_matches` names are found.
    #[must_use]
    pub fn extract(&self, text: &str, phrases: &PhraseSet) -> MatchSet {
        let mut matches = MatchSet::new();
        if phrases.is_empty() {
            return matches;
        }

        for captures in self.pattern.captures_iter(text) {
            let Some(inner) = captures.get(1) else {
                continue;
            };

            let candidate = self.normalize(inner.as_str());
            if candidate.is_empty() || !phrases.contains(&candidate) {
                continue;
            }

            matches.insert(candidate);
            if matches.len() >= self.config.max_matches {
                tracing::debug!(max_matches = self.config.max_matches, "Match cap reached");
                break;
            }
        }

        matches
    }

    fn normalize(&self, raw: &str) -> String {
        let unescaped = unescape_markdown(raw);
        let cleaned = if self.config.strip_whitespace {
            unescaped.trim()
        } else {
            unescaped.as_str()
        };

        if self.config.ignore_case {
            cleaned.to_lowercase()
        } else {
            cleaned.to_string()
        }
    }
}

/// Drops the backslash the comment renderer puts in front of markdown
/// punctuation (`Mr\. Bones` -> `Mr. Bones`).
fn unescape_markdown(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.peek() {
                if next.is_ascii_punctuation() {
                    continue;
                }
            }
        }
        out.push(c);
    }

    out
}
