//! Relationship builder
//!
//! Entities resolved in the same article are linked pairwise. Each pair's
//! count is the number of distinct articles mentioning both, enforced by a
//! per-article ledger in the store, so re-running an article never
//! double-counts.

use crate::model::{ArticleId, EntityId, EntityPair};
use crate::storage::{EntityStore, IncrementOutcome, StorageResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    Created,
    Incremented,
    /// This article was already counted for the pair
    AlreadyCounted,
    /// Concurrent writers kept racing; the pair was left for a later run
    Conflict,
}

/// Summary of one article's relationship pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipUpdate {
    pub outcomes: Vec<(EntityPair, PairOutcome)>,
}

impl RelationshipUpdate {
    pub fn count(&self, outcome: PairOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = EntityPair> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == PairOutcome::Conflict)
            .map(|(pair, _)| *pair)
    }
}

pub struct RelationshipBuilder {
    store: Arc<dyn EntityStore>,
    max_conflict_retries: usize,
}

impl RelationshipBuilder {
    pub fn new(store: Arc<dyn EntityStore>, max_conflict_retries: usize) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    /// Link every unordered pair of distinct ids seen in `article_id`.
    ///
    /// Storage failures abort the pass; a pair that loses every race is
    /// reported as `Conflict` and the rest proceed.
    pub fn update(
        &self,
        ids: &[EntityId],
        article_id: &ArticleId,
        at: DateTime<Utc>,
    ) -> StorageResult<RelationshipUpdate> {
        let mut update = RelationshipUpdate::default();
        for pair in EntityPair::all_pairs(ids.iter().copied()) {
            let outcome = self.apply(pair, article_id, at)?;
            debug!(pair = %pair, ?outcome, "relationship");
            update.outcomes.push((pair, outcome));
        }
        Ok(update)
    }

    fn apply(&self, pair: EntityPair, article_id: &ArticleId, at: DateTime<Utc>) -> StorageResult<PairOutcome> {
        let mut attempts = 0;
        loop {
            match self.store.increment_relationship(pair, article_id, at)? {
                IncrementOutcome::Incremented => return Ok(PairOutcome::Incremented),
                IncrementOutcome::AlreadyCounted => return Ok(PairOutcome::AlreadyCounted),
                IncrementOutcome::Missing => {}
            }

            match self.store.insert_relationship(pair, article_id, at) {
                Ok(()) => return Ok(PairOutcome::Created),
                Err(err) if err.is_conflict() => {
                    attempts += 1;
                    if attempts > self.max_conflict_retries {
                        warn!(pair = %pair, attempts, "relationship write kept conflicting");
                        return Ok(PairOutcome::Conflict);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
