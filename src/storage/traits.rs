//! Storage trait definitions

use crate::model::{
    AnalysisResult, ArticleId, CanonicalEntity, EntityId, EntityMention, EntityMentionContext, EntityPair,
    EntityRelationship, EntityType, MentionContextId, MentionId, NewAnalysisResult, NewEntity, NewMention,
    RunId, Span, TrackingState,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// A uniqueness constraint was violated; someone else wrote the row first
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StorageError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StorageError::Database(err),
        }
    }
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for listing entities
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_type: Option<EntityType>,
    /// Only entities seen at or after this instant
    pub seen_since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn seen_since(mut self, since: DateTime<Utc>) -> Self {
        self.seen_since = Some(since);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result of trying to bump an existing relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The row existed and this article was counted
    Incremented,
    /// This article already contributed to the pair
    AlreadyCounted,
    /// No row for the pair yet
    Missing,
}

/// Trait for entity storage backends
///
/// Implementations must be thread-safe (Send + Sync): several workers share
/// one store. Every method is a self-contained unit of work; nothing holds
/// a lock across calls. Uniqueness violations surface as
/// `StorageError::Conflict` so callers can re-read and retry.
pub trait EntityStore: Send + Sync {
    // === Canonical entities ===

    /// Create an entity together with its first alias.
    ///
    /// Fails with `Conflict` when `(normalized_name, entity_type)` exists.
    fn insert_entity(&self, entity: &NewEntity) -> StorageResult<EntityId>;

    fn load_entity(&self, id: EntityId) -> StorageResult<Option<CanonicalEntity>>;

    /// Entities whose alias index holds `normalized_key` for the type, ascending by id
    fn find_by_alias(&self, normalized_key: &str, entity_type: EntityType) -> StorageResult<Vec<EntityId>>;

    fn find_by_normalized_name(
        &self,
        normalized_name: &str,
        entity_type: EntityType,
    ) -> StorageResult<Option<EntityId>>;

    /// `(normalized_name, id)` of every canonical entity of the type, by id.
    /// Aliases are left out so near-matches never chain through each other.
    fn canonical_keys_of_type(&self, entity_type: EntityType) -> StorageResult<Vec<(String, EntityId)>>;

    /// Record a surface form for an entity. Returns false if it was already known.
    fn add_alias(
        &self,
        id: EntityId,
        surface: &str,
        normalized_key: &str,
        entity_type: EntityType,
    ) -> StorageResult<bool>;

    /// Advance `last_seen` (never moves it backwards, may move `first_seen` earlier)
    fn touch_entity(&self, id: EntityId, seen_at: DateTime<Utc>) -> StorageResult<()>;

    fn list_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<CanonicalEntity>>;

    // === Mentions ===

    /// Insert a mention keyed by `(article_id, span)`.
    ///
    /// Returns the stored row and whether it was created; an existing
    /// mention for the same key is returned unchanged.
    fn insert_mention(&self, mention: &NewMention) -> StorageResult<(EntityMention, bool)>;

    fn find_mention(&self, article_id: &ArticleId, span: Span) -> StorageResult<Option<EntityMention>>;

    fn load_mention(&self, id: MentionId) -> StorageResult<Option<EntityMention>>;

    fn mentions_for_entity(&self, id: EntityId) -> StorageResult<Vec<EntityMention>>;

    fn mentions_for_article(&self, article_id: &ArticleId) -> StorageResult<Vec<EntityMention>>;

    /// `(entity, observed_at)` for every mention observed in `[since, until)`
    fn mention_times(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StorageResult<Vec<(EntityId, DateTime<Utc>)>>;

    /// Delete a mention and, by cascade, its context
    fn delete_mention(&self, id: MentionId) -> StorageResult<bool>;

    // === Mention contexts ===

    /// Store the window for a mention; returns the existing id if one is stored
    fn insert_context(
        &self,
        mention_id: MentionId,
        window_text: &str,
        window_size: usize,
    ) -> StorageResult<MentionContextId>;

    fn context_for_mention(&self, mention_id: MentionId) -> StorageResult<Option<EntityMentionContext>>;

    // === Relationships ===

    /// Bump the pair's count by one for `article_id`, atomically with the
    /// per-article ledger.
    fn increment_relationship(
        &self,
        pair: EntityPair,
        article_id: &ArticleId,
        at: DateTime<Utc>,
    ) -> StorageResult<IncrementOutcome>;

    /// Create the pair with count 1. Fails with `Conflict` if the pair exists.
    fn insert_relationship(&self, pair: EntityPair, article_id: &ArticleId, at: DateTime<Utc>) -> StorageResult<()>;

    fn load_relationship(&self, pair: EntityPair) -> StorageResult<Option<EntityRelationship>>;

    fn relationships_for(&self, id: EntityId) -> StorageResult<Vec<EntityRelationship>>;

    /// Strongest relationships first
    fn top_relationships(&self, limit: usize) -> StorageResult<Vec<EntityRelationship>>;

    // === Analysis results ===

    /// Append a result; it supersedes the newest result of the same type and subject.
    fn append_analysis(&self, result: &NewAnalysisResult) -> StorageResult<AnalysisResult>;

    fn latest_analysis(&self, result_type: &str, entity_id: EntityId) -> StorageResult<Option<AnalysisResult>>;

    /// Newest results of a type that nothing supersedes yet
    fn current_analyses(&self, result_type: &str, limit: usize) -> StorageResult<Vec<AnalysisResult>>;

    // === Tracking runs ===

    /// Insert or replace the run record
    fn save_run(&self, state: &TrackingState) -> StorageResult<()>;

    fn load_run(&self, run_id: RunId) -> StorageResult<Option<TrackingState>>;

    /// Runs for an article, oldest first
    fn runs_for_article(&self, article_id: &ArticleId) -> StorageResult<Vec<TrackingState>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: EntityStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
