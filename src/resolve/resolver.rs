//! Entity resolver: maps a mention to a canonical entity, creating one when
//! nothing matches.
//!
//! Every decision is backed by a store lookup, never by process memory, so
//! parallel workers and restarted processes converge on the same ids. The
//! only synchronization is the store's uniqueness constraint on
//! `(normalized_name, entity_type)`: losing a create race surfaces as a
//! conflict, after which the resolver looks again and attaches to the
//! winner.

use super::fuzzy::FuzzyMatcher;
use super::normalize::MentionNormalizer;
use super::MentionError;
use crate::config::ResolutionConfig;
use crate::model::{ArticleId, EntityId, EntityType, MentionId, NewEntity, NewMention, RunId, Span};
use crate::storage::EntityStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the resolver needs to know about one extracted span
#[derive(Debug, Clone, PartialEq)]
pub struct MentionRequest {
    pub article_id: ArticleId,
    pub surface_text: String,
    pub entity_type: EntityType,
    pub span: Span,
    pub confidence: f32,
    pub observed_at: DateTime<Utc>,
    pub run_id: RunId,
}

/// How a mention found its canonical entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// The normalized key was already in the alias index
    Alias,
    /// The key equals an entity's normalized canonical name
    CanonicalName,
    /// Near-duplicate of a known alias
    Fuzzy,
    /// A new canonical entity was created
    Created,
    /// The span was resolved before; nothing was written
    AlreadyRecorded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entity_id: EntityId,
    pub mention_id: MentionId,
    pub kind: ResolutionKind,
}

pub struct EntityResolver {
    store: Arc<dyn EntityStore>,
    normalizer: MentionNormalizer,
    fuzzy: Option<FuzzyMatcher>,
    max_conflict_retries: usize,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn EntityStore>, config: &ResolutionConfig) -> Self {
        Self {
            store,
            normalizer: MentionNormalizer::new(&config.honorifics),
            fuzzy: config.fuzzy_matching.then(|| FuzzyMatcher::from_config(config)),
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    pub fn normalizer(&self) -> &MentionNormalizer {
        &self.normalizer
    }

    /// Resolve a mention and persist it.
    ///
    /// Resolving a span that already has a mention row is a no-op that
    /// returns the stored ids.
    pub fn resolve(&self, request: &MentionRequest) -> Result<Resolution, MentionError> {
        let key = self.normalize_checked(&request.surface_text, request.entity_type)?;

        if let Some(existing) = self.store.find_mention(&request.article_id, request.span)? {
            debug!(
                article_id = %request.article_id,
                span = %request.span,
                entity_id = %existing.entity_id,
                "span already resolved"
            );
            return Ok(Resolution {
                entity_id: existing.entity_id,
                mention_id: existing.id,
                kind: ResolutionKind::AlreadyRecorded,
            });
        }

        let (entity_id, kind) = self.resolve_entity(request, &key)?;

        let (mention, created) = self.store.insert_mention(&NewMention {
            article_id: request.article_id.clone(),
            entity_id,
            surface_text: request.surface_text.clone(),
            span: request.span,
            confidence: request.confidence,
            observed_at: request.observed_at,
            run_id: request.run_id,
        })?;

        // A concurrent run of the same article stored this span first
        let kind = if created { kind } else { ResolutionKind::AlreadyRecorded };
        debug!(
            surface = %request.surface_text,
            key = %key,
            entity_id = %mention.entity_id,
            ?kind,
            "mention resolved"
        );

        Ok(Resolution {
            entity_id: mention.entity_id,
            mention_id: mention.id,
            kind,
        })
    }

    /// Find the entity a name would resolve to, without writing anything.
    pub fn lookup(&self, surface: &str, entity_type: EntityType) -> Result<Option<EntityId>, MentionError> {
        let key = self.normalize_checked(surface, entity_type)?;
        Ok(self.lookup_key(&key, entity_type)?.map(|(id, _)| id))
    }

    fn normalize_checked(&self, surface: &str, entity_type: EntityType) -> Result<String, MentionError> {
        let key = self.normalizer.normalize(surface, entity_type);
        if key.is_empty() {
            return Err(MentionError::InvalidMention {
                surface: surface.to_string(),
            });
        }
        Ok(key)
    }

    /// Create-or-merge with conflict retry
    fn resolve_entity(&self, request: &MentionRequest, key: &str) -> Result<(EntityId, ResolutionKind), MentionError> {
        let surface = request.surface_text.trim();
        let mut conflicts = 0;

        loop {
            if let Some((id, kind)) = self.lookup_key(key, request.entity_type)? {
                self.attach(id, surface, key, request)?;
                return Ok((id, kind));
            }

            let new_entity = NewEntity::new(surface, key, request.entity_type, request.observed_at);
            match self.store.insert_entity(&new_entity) {
                Ok(id) => {
                    info!(
                        entity_id = %id,
                        name = %surface,
                        entity_type = %request.entity_type,
                        "created canonical entity"
                    );
                    return Ok((id, ResolutionKind::Created));
                }
                Err(err) if err.is_conflict() => {
                    conflicts += 1;
                    if conflicts > self.max_conflict_retries {
                        return Err(MentionError::ResolutionConflict {
                            subject: format!("{} ({})", key, request.entity_type),
                            attempts: conflicts,
                        });
                    }
                    debug!(key = %key, attempt = conflicts, "lost create race, looking up winner");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn lookup_key(&self, key: &str, entity_type: EntityType) -> Result<Option<(EntityId, ResolutionKind)>, MentionError> {
        let by_alias = self.store.find_by_alias(key, entity_type)?;
        if let Some(&lowest) = by_alias.first() {
            if by_alias.len() > 1 {
                warn!(
                    key = %key,
                    entity_type = %entity_type,
                    candidates = ?by_alias,
                    chosen = %lowest,
                    "alias maps to several canonical entities; using lowest id"
                );
            }
            return Ok(Some((lowest, ResolutionKind::Alias)));
        }

        if let Some(id) = self.store.find_by_normalized_name(key, entity_type)? {
            return Ok(Some((id, ResolutionKind::CanonicalName)));
        }

        if let Some(fuzzy) = &self.fuzzy {
            let candidates = self.store.canonical_keys_of_type(entity_type)?;
            if let Some(found) = fuzzy.best_match(key, entity_type, &candidates) {
                if found.ambiguous {
                    warn!(
                        key = %key,
                        entity_type = %entity_type,
                        first = %found.entity_id,
                        "fuzzy match is ambiguous; not merging"
                    );
                    return Ok(None);
                }
                debug!(key = %key, alias = %found.alias_key, entity_id = %found.entity_id, "fuzzy match");
                return Ok(Some((found.entity_id, ResolutionKind::Fuzzy)));
            }
        }

        Ok(None)
    }

    fn attach(&self, id: EntityId, surface: &str, key: &str, request: &MentionRequest) -> Result<(), MentionError> {
        if self.store.add_alias(id, surface, key, request.entity_type)? {
            debug!(entity_id = %id, alias = %surface, "new alias");
        }
        self.store.touch_entity(id, request.observed_at)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};
    use chrono::TimeZone;

    fn setup() -> (Arc<SqliteStore>, EntityResolver) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let resolver = EntityResolver::new(store.clone(), &ResolutionConfig::default());
        (store, resolver)
    }

    fn request(article: &str, surface: &str, entity_type: EntityType, start: usize) -> MentionRequest {
        MentionRequest {
            article_id: ArticleId::new(article),
            surface_text: surface.to_string(),
            entity_type,
            span: Span::new(start, start + surface.chars().count().max(1)),
            confidence: 0.9,
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            run_id: RunId::new(),
        }
    }

    // === Scenario: first mention creates, later mentions attach ===
    #[test]
    fn creates_then_matches_by_alias() {
        let (store, resolver) = setup();

        let first = resolver.resolve(&request("a1", "Jane Doe", EntityType::Person, 0)).unwrap();
        assert_eq!(first.kind, ResolutionKind::Created);

        let second = resolver.resolve(&request("a2", "JANE  DOE", EntityType::Person, 5)).unwrap();
        assert_eq!(second.kind, ResolutionKind::Alias);
        assert_eq!(second.entity_id, first.entity_id);
        assert_ne!(second.mention_id, first.mention_id);

        let entity = store.load_entity(first.entity_id).unwrap().unwrap();
        assert_eq!(entity.canonical_name, "Jane Doe");
        assert!(entity.has_alias("JANE  DOE"));
    }

    #[test]
    fn honorific_variant_resolves_to_same_person() {
        let (_, resolver) = setup();
        let a = resolver.resolve(&request("a1", "Jane Doe", EntityType::Person, 0)).unwrap();
        let b = resolver.resolve(&request("a1", "Dr. Jane Doe", EntityType::Person, 40)).unwrap();
        assert_eq!(a.entity_id, b.entity_id);
    }

    #[test]
    fn same_name_different_type_is_distinct() {
        let (_, resolver) = setup();
        let person = resolver.resolve(&request("a1", "Jordan", EntityType::Person, 0)).unwrap();
        let place = resolver.resolve(&request("a1", "Jordan", EntityType::Location, 20)).unwrap();
        assert_ne!(person.entity_id, place.entity_id);
    }

    #[test]
    fn initials_merge_through_fuzzy_fallback() {
        let (store, resolver) = setup();
        let jane = resolver.resolve(&request("a1", "Jane Doe", EntityType::Person, 0)).unwrap();
        let j = resolver.resolve(&request("a2", "J. Doe", EntityType::Person, 0)).unwrap();
        assert_eq!(j.kind, ResolutionKind::Fuzzy);
        assert_eq!(j.entity_id, jane.entity_id);

        // The new alias now short-circuits through the index
        let again = resolver.resolve(&request("a3", "J. Doe", EntityType::Person, 0)).unwrap();
        assert_eq!(again.kind, ResolutionKind::Alias);
        assert_eq!(store.load_entity(jane.entity_id).unwrap().unwrap().aliases.len(), 2);
    }

    // === Scenario: an initial never becomes a bridge to a different first name ===
    #[test]
    fn initial_alias_does_not_absorb_other_first_names() {
        let (store, resolver) = setup();
        let jane = resolver.resolve(&request("a1", "Jane Doe", EntityType::Person, 0)).unwrap();
        let j = resolver.resolve(&request("a2", "J. Doe", EntityType::Person, 0)).unwrap();
        assert_eq!(j.entity_id, jane.entity_id);

        let john = resolver.resolve(&request("a3", "John Doe", EntityType::Person, 0)).unwrap();
        assert_eq!(john.kind, ResolutionKind::Created);
        assert_ne!(john.entity_id, jane.entity_id);

        let people = store
            .list_entities(&crate::storage::EntityFilter::new().with_type(EntityType::Person))
            .unwrap();
        assert_eq!(people.len(), 2);
        let jane_row = store.load_entity(jane.entity_id).unwrap().unwrap();
        assert!(!jane_row.has_alias("John Doe"));
    }

    #[test]
    fn ambiguous_initial_is_not_merged() {
        let (store, resolver) = setup();
        let jane = resolver.resolve(&request("a1", "Jane Doe", EntityType::Person, 0)).unwrap();
        let john = resolver.resolve(&request("a2", "John Doe", EntityType::Person, 0)).unwrap();

        let j = resolver.resolve(&request("a3", "J. Doe", EntityType::Person, 0)).unwrap();
        assert_eq!(j.kind, ResolutionKind::Created);
        assert_ne!(j.entity_id, jane.entity_id);
        assert_ne!(j.entity_id, john.entity_id);
        assert_eq!(store.load_entity(jane.entity_id).unwrap().unwrap().aliases.len(), 1);
        assert_eq!(store.load_entity(john.entity_id).unwrap().unwrap().aliases.len(), 1);
    }

    #[test]
    fn fuzzy_fallback_can_be_disabled() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let config = ResolutionConfig {
            fuzzy_matching: false,
            ..ResolutionConfig::default()
        };
        let resolver = EntityResolver::new(store, &config);
        let jane = resolver.resolve(&request("a1", "Jane Doe", EntityType::Person, 0)).unwrap();
        let j = resolver.resolve(&request("a2", "J. Doe", EntityType::Person, 0)).unwrap();
        assert_ne!(jane.entity_id, j.entity_id);
    }

    #[test]
    fn empty_key_is_invalid_mention() {
        let (store, resolver) = setup();
        let err = resolver.resolve(&request("a1", " ... ", EntityType::Other, 0)).unwrap_err();
        assert!(matches!(err, MentionError::InvalidMention { .. }));
        assert!(store.mentions_for_article(&ArticleId::new("a1")).unwrap().is_empty());
    }

    #[test]
    fn re_resolving_a_span_is_a_no_op() {
        let (store, resolver) = setup();
        let req = request("a1", "Acme Corp", EntityType::Organization, 10);
        let first = resolver.resolve(&req).unwrap();
        let second = resolver.resolve(&req).unwrap();

        assert_eq!(second.kind, ResolutionKind::AlreadyRecorded);
        assert_eq!(first.mention_id, second.mention_id);
        assert_eq!(store.mentions_for_entity(first.entity_id).unwrap().len(), 1);
    }

    #[test]
    fn idempotent_across_many_articles() {
        let (store, resolver) = setup();
        let ids: Vec<EntityId> = (0..6)
            .map(|i| {
                let surface = if i % 2 == 0 { "Acme Corp" } else { "ACME CORP." };
                resolver
                    .resolve(&request(&format!("a{}", i), surface, EntityType::Organization, 0))
                    .unwrap()
                    .entity_id
            })
            .collect();

        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(
            store
                .list_entities(&crate::storage::EntityFilter::new().with_type(EntityType::Organization))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.mentions_for_entity(ids[0]).unwrap().len(), 6);
        assert_eq!(store.load_entity(ids[0]).unwrap().unwrap().aliases.len(), 2);
    }

    #[test]
    fn duplicate_alias_ties_break_to_lowest_id() {
        let (store, resolver) = setup();
        let seen = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let low = store
            .insert_entity(&NewEntity::new("Jane Doe", "jane doe", EntityType::Person, seen))
            .unwrap();
        let high = store
            .insert_entity(&NewEntity::new("J. Doe", "j doe", EntityType::Person, seen))
            .unwrap();
        // Inconsistent data: both entities claim the same alias key
        store.add_alias(low, "J Doe", "j doe", EntityType::Person).unwrap();
        assert!(low < high);

        let res = resolver.resolve(&request("a1", "J. Doe", EntityType::Person, 0)).unwrap();
        assert_eq!(res.entity_id, low);
        assert_eq!(res.kind, ResolutionKind::Alias);
    }

    #[test]
    fn lookup_does_not_write() {
        let (store, resolver) = setup();
        assert_eq!(resolver.lookup("Acme", EntityType::Organization).unwrap(), None);
        let res = resolver.resolve(&request("a1", "Acme", EntityType::Organization, 0)).unwrap();
        assert_eq!(resolver.lookup("ACME", EntityType::Organization).unwrap(), Some(res.entity_id));
        assert_eq!(store.list_entities(&Default::default()).unwrap().len(), 1);
    }

    #[test]
    fn last_seen_advances_with_later_mentions() {
        let (store, resolver) = setup();
        let mut req = request("a1", "Acme", EntityType::Organization, 0);
        let res = resolver.resolve(&req).unwrap();

        req.article_id = ArticleId::new("a2");
        req.observed_at = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        resolver.resolve(&req).unwrap();

        let entity = store.load_entity(res.entity_id).unwrap().unwrap();
        assert_eq!(entity.last_seen, req.observed_at);
        assert!(entity.first_seen < entity.last_seen);
    }
}
