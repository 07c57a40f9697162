//! Articles, mentions and mention context windows

use super::entity::EntityId;
use super::run::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a source article.
///
/// Serializes as a plain string; ids come from the article source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(String);

impl ArticleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ArticleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ArticleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An ingested article. Read-only input to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Article {
    pub id: ArticleId,
    pub text: String,
    pub published_at: DateTime<Utc>,
}

impl Article {
    pub fn new(id: impl Into<ArticleId>, text: impl Into<String>, published_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            published_at,
        }
    }

    /// Length of the text in characters (the unit of span offsets)
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Character offsets of a mention, end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the span is non-empty and lies inside a text of `char_len` characters.
    pub fn fits(&self, char_len: usize) -> bool {
        self.start < self.end && self.end <= char_len
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Identifier of a persisted mention
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MentionId(i64);

impl MentionId {
    pub fn from_raw(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MentionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One occurrence of a canonical entity in one article. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub id: MentionId,
    pub article_id: ArticleId,
    pub entity_id: EntityId,
    pub surface_text: String,
    pub span: Span,
    /// Extractor confidence, passed through unmodified
    pub confidence: f32,
    /// Publication time of the article; drives trend bucketing
    pub observed_at: DateTime<Utc>,
    pub run_id: RunId,
}

/// A mention about to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMention {
    pub article_id: ArticleId,
    pub entity_id: EntityId,
    pub surface_text: String,
    pub span: Span,
    pub confidence: f32,
    pub observed_at: DateTime<Utc>,
    pub run_id: RunId,
}

/// Identifier of a persisted mention context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MentionContextId(i64);

impl MentionContextId {
    pub fn from_raw(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// The text window surrounding a mention.
///
/// Owned by its mention; removed when the mention is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMentionContext {
    pub id: MentionContextId,
    pub mention_id: MentionId,
    pub window_text: String,
    /// Characters requested on each side of the span
    pub window_size: usize,
}
