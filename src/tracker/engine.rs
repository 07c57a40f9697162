//! EntityTracker: the per-article pipeline and its read-only views
//!
//! A run walks one article through extraction, resolution, relationship
//! building and context recording. The `TrackingState` is threaded through
//! every step and saved at each transition, so a crashed or failed run can be
//! inspected and retried. A retry is a new run for the same article; spans an
//! earlier run already resolved are reused rather than resolved again.

use super::cancel::CancellationToken;
use super::context::ContextRecorder;
use super::input::{validate_entities, ExtractedEntity, InputError};
use super::relationships::{PairOutcome, RelationshipBuilder};
use super::trends::{Timeline, TrendAggregator};
use crate::config::{ConfigError, TrackerConfig};
use crate::model::{
    AnalysisResult, Article, ArticleId, CanonicalEntity, EntityId, EntityMention, EntityMentionContext, EntityPair,
    EntityRelationship, EntityType, ErrorDetail, ErrorKind, MentionId, MentionOutcome, MentionStatus, RunId, RunStatus,
    RunStep, Span, TrackingState, TransitionError,
};
use crate::resolve::{EntityResolver, MentionError, MentionRequest, ResolutionKind};
use crate::storage::{EntityStore, OpenStore, SqliteStore, StorageError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Mention(#[from] MentionError),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("invalid extractor output: {0}")]
    Input(#[from] InputError),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("trend window must span at least two buckets within the representable date range")]
    InvalidWindow,
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackerError::Storage(_) => ErrorKind::PersistenceFailure,
            TrackerError::Mention(err) => err.kind(),
            TrackerError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            TrackerError::Input(_) | TrackerError::Config(_) | TrackerError::InvalidWindow => ErrorKind::InvalidInput,
            TrackerError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Entity resolution and tracking engine.
///
/// Cheap to share: wrap in an `Arc` and call `process_article` from as many
/// threads as needed. All coordination happens in the store.
pub struct EntityTracker {
    store: Arc<dyn EntityStore>,
    config: TrackerConfig,
    resolver: EntityResolver,
    contexts: ContextRecorder,
    relationships: RelationshipBuilder,
    trends: TrendAggregator,
}

impl EntityTracker {
    pub fn new(store: Arc<dyn EntityStore>, config: TrackerConfig) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self {
            resolver: EntityResolver::new(store.clone(), &config.resolution),
            contexts: ContextRecorder::new(store.clone(), config.context.window_size),
            relationships: RelationshipBuilder::new(store.clone(), config.resolution.max_conflict_retries),
            trends: TrendAggregator::new(store.clone(), config.trends.clone()),
            store,
            config,
        })
    }

    /// Open (or create) a SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>, config: TrackerConfig) -> TrackerResult<Self> {
        let store = SqliteStore::open(path)?;
        Self::new(Arc::new(store), config)
    }

    pub fn in_memory(config: TrackerConfig) -> TrackerResult<Self> {
        Self::new(Arc::new(SqliteStore::open_in_memory()?), config)
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // === Processing ===

    /// Run the full pipeline for one article.
    ///
    /// Always returns the final state, COMPLETED or FAILED. Safe to call
    /// again for the same article.
    pub fn process_article(&self, article: &Article, entities: &[ExtractedEntity]) -> TrackingState {
        self.process_article_with_cancel(article, entities, &CancellationToken::new())
    }

    pub fn process_article_with_cancel(
        &self,
        article: &Article,
        entities: &[ExtractedEntity],
        cancel: &CancellationToken,
    ) -> TrackingState {
        let mut state = TrackingState::new(article.id.clone());
        let span = info_span!("run", run_id = %state.run_id, article_id = %article.id);
        let _enter = span.enter();

        let mut step = RunStep::Extraction;
        match self.drive(&mut state, &mut step, article, entities, cancel) {
            Ok(()) => {
                info!(
                    resolved = state.resolved_entities().len(),
                    skipped = state.mentions.iter().filter(|m| m.resolved_ids().is_none()).count(),
                    "run completed"
                );
            }
            Err(err) => {
                let kind = err.kind();
                if kind == ErrorKind::Cancelled {
                    warn!(%step, "run cancelled");
                } else {
                    error!(%step, error = %err, "run failed");
                }
                state.fail(ErrorDetail::new(kind, err.to_string(), step));
                if let Err(save_err) = self.store.save_run(&state) {
                    error!(error = %save_err, "could not persist failed run");
                }
            }
        }
        state
    }

    fn drive(
        &self,
        state: &mut TrackingState,
        step: &mut RunStep,
        article: &Article,
        entities: &[ExtractedEntity],
        cancel: &CancellationToken,
    ) -> TrackerResult<()> {
        self.store.save_run(state)?;
        checkpoint(cancel)?;

        // Extraction
        self.advance(state, RunStatus::Extracting, *step)?;
        validate_entities(entities)?;
        state.push_log(*step, format!("{} spans from extractor", entities.len()));
        let prior = self.prior_resolutions(&article.id, state.run_id)?;
        if !prior.is_empty() {
            state.push_log(*step, format!("{} spans resolved by earlier runs", prior.len()));
        }
        checkpoint(cancel)?;

        // Resolution
        *step = RunStep::Resolution;
        self.advance(state, RunStatus::Resolving, *step)?;
        let article_len = article.char_len();
        for (index, extracted) in entities.iter().enumerate() {
            checkpoint(cancel)?;
            let status = self.resolve_one(state.run_id, article, article_len, extracted, &prior)?;
            state.record_outcome(MentionOutcome {
                index,
                surface_text: extracted.surface_text.clone(),
                span: extracted.span(),
                status,
            });
        }

        *step = RunStep::Relationships;
        let ids = state.resolved_entities();
        let update = self.relationships.update(&ids, &article.id, article.published_at)?;
        state.push_log(
            *step,
            format!(
                "{} pairs: {} created, {} incremented, {} already counted",
                update.outcomes.len(),
                update.count(PairOutcome::Created),
                update.count(PairOutcome::Incremented),
                update.count(PairOutcome::AlreadyCounted),
            ),
        );
        for pair in update.conflicts() {
            state.push_log(*step, format!("pair {} skipped after repeated write conflicts", pair));
        }
        checkpoint(cancel)?;

        // Context
        *step = RunStep::Context;
        self.advance(state, RunStatus::Aggregating, *step)?;
        self.record_contexts(state, article, cancel)?;

        *step = RunStep::Completion;
        self.advance(state, RunStatus::Completed, *step)?;
        Ok(())
    }

    fn advance(&self, state: &mut TrackingState, next: RunStatus, step: RunStep) -> TrackerResult<()> {
        let from = state.status;
        state.transition(next)?;
        state.push_log(step, format!("{} -> {}", from, next));
        self.store.save_run(state)?;
        info!(%from, to = %next, "run transition");
        Ok(())
    }

    /// Spans resolved by any earlier run of this article
    fn prior_resolutions(&self, article_id: &ArticleId, current: RunId) -> TrackerResult<HashMap<Span, (EntityId, MentionId)>> {
        let mut resolved = HashMap::new();
        for run in self.store.runs_for_article(article_id)? {
            if run.run_id != current {
                resolved.extend(run.resolved_spans());
            }
        }
        Ok(resolved)
    }

    /// Resolve one span. Per-mention problems become outcomes; only storage
    /// failures escape.
    fn resolve_one(
        &self,
        run_id: RunId,
        article: &Article,
        article_len: usize,
        extracted: &ExtractedEntity,
        prior: &HashMap<Span, (EntityId, MentionId)>,
    ) -> TrackerResult<MentionStatus> {
        let span = extracted.span();

        if !span.fits(article_len) {
            let err = MentionError::InvalidSpan { span, article_len };
            warn!(surface = %extracted.surface_text, error = %err, "skipping mention");
            return Ok(MentionStatus::Skipped {
                kind: err.kind(),
                message: err.to_string(),
            });
        }

        if let Some(&(entity_id, mention_id)) = prior.get(&span) {
            debug!(%span, %entity_id, "reusing earlier resolution");
            return Ok(MentionStatus::Resolved {
                entity_id,
                mention_id,
                reused: true,
                context_id: None,
            });
        }

        let request = MentionRequest {
            article_id: article.id.clone(),
            surface_text: extracted.surface_text.clone(),
            entity_type: extracted.entity_type,
            span,
            confidence: extracted.confidence,
            observed_at: article.published_at,
            run_id,
        };

        match self.resolver.resolve(&request) {
            Ok(resolution) => Ok(MentionStatus::Resolved {
                entity_id: resolution.entity_id,
                mention_id: resolution.mention_id,
                reused: resolution.kind == ResolutionKind::AlreadyRecorded,
                context_id: None,
            }),
            Err(err) if err.is_recoverable() => {
                warn!(surface = %extracted.surface_text, error = %err, "mention not resolved");
                let (kind, message) = (err.kind(), err.to_string());
                Ok(match err {
                    MentionError::ResolutionConflict { .. } => MentionStatus::Failed { kind, message },
                    _ => MentionStatus::Skipped { kind, message },
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn record_contexts(&self, state: &mut TrackingState, article: &Article, cancel: &CancellationToken) -> TrackerResult<()> {
        let mut failures = Vec::new();

        for outcome in state.mentions.iter_mut() {
            let span = outcome.span;
            let MentionStatus::Resolved {
                mention_id, context_id, ..
            } = &mut outcome.status
            else {
                continue;
            };
            checkpoint(cancel)?;

            match self.contexts.record(*mention_id, &article.text, span) {
                Ok(id) => *context_id = Some(id),
                Err(err) if err.is_recoverable() => {
                    warn!(%span, error = %err, "context not recorded");
                    failures.push(format!("context for {} not recorded: {}", span, err));
                }
                Err(err) => return Err(err.into()),
            }
        }

        for message in failures {
            state.push_log(RunStep::Context, message);
        }
        Ok(())
    }

    // === Entities ===

    pub fn get_canonical_entity(&self, id: EntityId) -> TrackerResult<Option<CanonicalEntity>> {
        Ok(self.store.load_entity(id)?)
    }

    /// Look a name up the way a mention would be resolved, without writing.
    pub fn find_entity(&self, name: &str, entity_type: EntityType) -> TrackerResult<Option<CanonicalEntity>> {
        match self.resolver.lookup(name, entity_type) {
            Ok(Some(id)) => self.get_canonical_entity(id),
            Ok(None) | Err(MentionError::InvalidMention { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn mentions_for_entity(&self, id: EntityId) -> TrackerResult<Vec<EntityMention>> {
        Ok(self.store.mentions_for_entity(id)?)
    }

    pub fn context_for_mention(&self, id: MentionId) -> TrackerResult<Option<EntityMentionContext>> {
        Ok(self.store.context_for_mention(id)?)
    }

    // === Relationships ===

    /// Order-insensitive; an entity has no relationship with itself.
    pub fn relationship_between(&self, a: EntityId, b: EntityId) -> TrackerResult<Option<EntityRelationship>> {
        match EntityPair::new(a, b) {
            Some(pair) => Ok(self.store.load_relationship(pair)?),
            None => Ok(None),
        }
    }

    pub fn relationships_for(&self, id: EntityId) -> TrackerResult<Vec<EntityRelationship>> {
        Ok(self.store.relationships_for(id)?)
    }

    pub fn top_relationships(&self, limit: usize) -> TrackerResult<Vec<EntityRelationship>> {
        Ok(self.store.top_relationships(limit)?)
    }

    // === Trends ===

    /// Detect entities whose newest bucket spikes above their baseline over
    /// `[as_of - window, as_of)`, and record a result for each.
    pub fn compute_trends(&self, as_of: DateTime<Utc>, window: Duration) -> TrackerResult<Vec<AnalysisResult>> {
        let window = self.trends.window(as_of, window).ok_or(TrackerError::InvalidWindow)?;
        Ok(self.trends.compute(&window)?)
    }

    pub fn latest_trends(&self, limit: usize) -> TrackerResult<Vec<AnalysisResult>> {
        Ok(self.trends.latest(limit)?)
    }

    pub fn entity_timeline(&self, id: EntityId, as_of: DateTime<Utc>, window: Duration) -> TrackerResult<Timeline> {
        let window = self.trends.window(as_of, window).ok_or(TrackerError::InvalidWindow)?;
        Ok(self.trends.timeline(id, &window)?)
    }

    // === Runs ===

    pub fn get_run(&self, run_id: RunId) -> TrackerResult<Option<TrackingState>> {
        Ok(self.store.load_run(run_id)?)
    }

    pub fn runs_for_article(&self, article_id: &ArticleId) -> TrackerResult<Vec<TrackingState>> {
        Ok(self.store.runs_for_article(article_id)?)
    }
}

fn checkpoint(cancel: &CancellationToken) -> TrackerResult<()> {
    if cancel.is_cancelled() {
        return Err(TrackerError::Cancelled);
    }
    Ok(())
}
