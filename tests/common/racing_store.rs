//! Store wrapper that loses write races on demand
//!
//! Every call is delegated to an in-memory `SqliteStore`. Before delegating
//! a create, the wrapper can let a phantom competitor write the same row
//! first, which is exactly what a second worker winning the race looks like
//! from the caller's side.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use newsgraph::model::{
    AnalysisResult, ArticleId, CanonicalEntity, EntityId, EntityMention, EntityMentionContext, EntityPair,
    EntityRelationship, EntityType, MentionContextId, MentionId, NewAnalysisResult, NewEntity, NewMention, RunId,
    Span, TrackingState,
};
use newsgraph::storage::{EntityFilter, IncrementOutcome};
use newsgraph::{EntityStore, OpenStore, SqliteStore, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct RacingStore {
    inner: SqliteStore,
    /// Entity creates that a competitor wins first
    entity_races: AtomicUsize,
    /// Every entity create conflicts and nobody ever wins
    entity_livelock: AtomicBool,
    /// Relationship creates that a competitor (another article) wins first
    relationship_races: AtomicUsize,
    /// Mention writes fail with an I/O error
    fail_mentions: AtomicBool,
    entity_conflicts: AtomicUsize,
}

impl RacingStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            entity_races: AtomicUsize::new(0),
            entity_livelock: AtomicBool::new(false),
            relationship_races: AtomicUsize::new(0),
            fail_mentions: AtomicBool::new(false),
            entity_conflicts: AtomicUsize::new(0),
        }
    }

    pub fn lose_entity_races(&self, n: usize) {
        self.entity_races.store(n, Ordering::SeqCst);
    }

    pub fn livelock_entity_creates(&self, on: bool) {
        self.entity_livelock.store(on, Ordering::SeqCst);
    }

    pub fn lose_relationship_races(&self, n: usize) {
        self.relationship_races.store(n, Ordering::SeqCst);
    }

    pub fn fail_mention_writes(&self, on: bool) {
        self.fail_mentions.store(on, Ordering::SeqCst);
    }

    /// Conflicts reported to callers of `insert_entity`
    pub fn entity_conflicts(&self) -> usize {
        self.entity_conflicts.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl EntityStore for RacingStore {
    fn insert_entity(&self, entity: &NewEntity) -> StorageResult<EntityId> {
        if self.entity_livelock.load(Ordering::SeqCst) {
            self.entity_conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Conflict("entities.normalized_name".into()));
        }
        if Self::take(&self.entity_races) {
            self.inner.insert_entity(entity)?;
        }
        let result = self.inner.insert_entity(entity);
        if matches!(&result, Err(e) if e.is_conflict()) {
            self.entity_conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    fn load_entity(&self, id: EntityId) -> StorageResult<Option<CanonicalEntity>> {
        self.inner.load_entity(id)
    }

    fn find_by_alias(&self, normalized_key: &str, entity_type: EntityType) -> StorageResult<Vec<EntityId>> {
        self.inner.find_by_alias(normalized_key, entity_type)
    }

    fn find_by_normalized_name(&self, normalized_name: &str, entity_type: EntityType) -> StorageResult<Option<EntityId>> {
        self.inner.find_by_normalized_name(normalized_name, entity_type)
    }

    fn canonical_keys_of_type(&self, entity_type: EntityType) -> StorageResult<Vec<(String, EntityId)>> {
        self.inner.canonical_keys_of_type(entity_type)
    }

    fn add_alias(&self, id: EntityId, surface: &str, normalized_key: &str, entity_type: EntityType) -> StorageResult<bool> {
        self.inner.add_alias(id, surface, normalized_key, entity_type)
    }

    fn touch_entity(&self, id: EntityId, seen_at: DateTime<Utc>) -> StorageResult<()> {
        self.inner.touch_entity(id, seen_at)
    }

    fn list_entities(&self, filter: &EntityFilter) -> StorageResult<Vec<CanonicalEntity>> {
        self.inner.list_entities(filter)
    }

    fn insert_mention(&self, mention: &NewMention) -> StorageResult<(EntityMention, bool)> {
        if self.fail_mentions.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
        }
        self.inner.insert_mention(mention)
    }

    fn find_mention(&self, article_id: &ArticleId, span: Span) -> StorageResult<Option<EntityMention>> {
        self.inner.find_mention(article_id, span)
    }

    fn load_mention(&self, id: MentionId) -> StorageResult<Option<EntityMention>> {
        self.inner.load_mention(id)
    }

    fn mentions_for_entity(&self, id: EntityId) -> StorageResult<Vec<EntityMention>> {
        self.inner.mentions_for_entity(id)
    }

    fn mentions_for_article(&self, article_id: &ArticleId) -> StorageResult<Vec<EntityMention>> {
        self.inner.mentions_for_article(article_id)
    }

    fn mention_times(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> StorageResult<Vec<(EntityId, DateTime<Utc>)>> {
        self.inner.mention_times(since, until)
    }

    fn delete_mention(&self, id: MentionId) -> StorageResult<bool> {
        self.inner.delete_mention(id)
    }

    fn insert_context(&self, mention_id: MentionId, window_text: &str, window_size: usize) -> StorageResult<MentionContextId> {
        self.inner.insert_context(mention_id, window_text, window_size)
    }

    fn context_for_mention(&self, mention_id: MentionId) -> StorageResult<Option<EntityMentionContext>> {
        self.inner.context_for_mention(mention_id)
    }

    fn increment_relationship(&self, pair: EntityPair, article_id: &ArticleId, at: DateTime<Utc>) -> StorageResult<IncrementOutcome> {
        self.inner.increment_relationship(pair, article_id, at)
    }

    fn insert_relationship(&self, pair: EntityPair, article_id: &ArticleId, at: DateTime<Utc>) -> StorageResult<()> {
        if Self::take(&self.relationship_races) {
            self.inner.insert_relationship(pair, &ArticleId::new("competitor"), at)?;
        }
        self.inner.insert_relationship(pair, article_id, at)
    }

    fn load_relationship(&self, pair: EntityPair) -> StorageResult<Option<EntityRelationship>> {
        self.inner.load_relationship(pair)
    }

    fn relationships_for(&self, id: EntityId) -> StorageResult<Vec<EntityRelationship>> {
        self.inner.relationships_for(id)
    }

    fn top_relationships(&self, limit: usize) -> StorageResult<Vec<EntityRelationship>> {
        self.inner.top_relationships(limit)
    }

    fn append_analysis(&self, result: &NewAnalysisResult) -> StorageResult<AnalysisResult> {
        self.inner.append_analysis(result)
    }

    fn latest_analysis(&self, result_type: &str, entity_id: EntityId) -> StorageResult<Option<AnalysisResult>> {
        self.inner.latest_analysis(result_type, entity_id)
    }

    fn current_analyses(&self, result_type: &str, limit: usize) -> StorageResult<Vec<AnalysisResult>> {
        self.inner.current_analyses(result_type, limit)
    }

    fn save_run(&self, state: &TrackingState) -> StorageResult<()> {
        self.inner.save_run(state)
    }

    fn load_run(&self, run_id: RunId) -> StorageResult<Option<TrackingState>> {
        self.inner.load_run(run_id)
    }

    fn runs_for_article(&self, article_id: &ArticleId) -> StorageResult<Vec<TrackingState>> {
        self.inner.runs_for_article(article_id)
    }
}
