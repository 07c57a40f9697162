//! Near-duplicate name matching
//!
//! Used only after exact alias and canonical-name lookups miss, and only
//! against canonical names. Two rules:
//!
//! - **Initials** (people): same number of tokens (at least two), identical
//!   surname, and every other query token either equal to the candidate's
//!   or a single-letter initial of it. The rule is one-way: "j doe" matches
//!   "jane doe", but "john doe" never matches "j doe". "jane a doe" does not
//!   match "jane doe".
//! - **Edit distance** (all types): Levenshtein distance at most
//!   `max_edit_distance`, for keys of at least `min_len` characters.

use crate::config::ResolutionConfig;
use crate::model::{EntityId, EntityType};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyMatch {
    pub entity_id: EntityId,
    /// The canonical key that matched
    pub alias_key: String,
    /// More than one entity matched; `entity_id` is the lowest of them
    pub ambiguous: bool,
}

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    max_edit_distance: usize,
    min_len: usize,
}

impl FuzzyMatcher {
    pub fn new(max_edit_distance: usize, min_len: usize) -> Self {
        Self {
            max_edit_distance,
            min_len,
        }
    }

    pub fn from_config(config: &ResolutionConfig) -> Self {
        Self::new(config.max_edit_distance, config.min_fuzzy_len)
    }

    /// Whether the query key `key` may stand for the stored `candidate` key.
    pub fn matches(&self, key: &str, candidate: &str, entity_type: EntityType) -> bool {
        if key == candidate {
            return true;
        }
        if entity_type == EntityType::Person && initials_expand_to(key, candidate) {
            return true;
        }
        self.max_edit_distance > 0
            && key.chars().count() >= self.min_len
            && candidate.chars().count() >= self.min_len
            && strsim::levenshtein(key, candidate) <= self.max_edit_distance
    }

    /// Pick the lowest-id entity whose key matches `key`. The caller decides
    /// what to do with an ambiguous match.
    pub fn best_match(
        &self,
        key: &str,
        entity_type: EntityType,
        candidates: &[(String, EntityId)],
    ) -> Option<FuzzyMatch> {
        let mut matched: Vec<&(String, EntityId)> = candidates
            .iter()
            .filter(|(alias, _)| self.matches(key, alias, entity_type))
            .collect();
        matched.sort_by(|x, y| x.1.cmp(&y.1).then_with(|| x.0.cmp(&y.0)));

        let distinct: BTreeSet<EntityId> = matched.iter().map(|(_, id)| *id).collect();
        matched.first().map(|(alias, id)| FuzzyMatch {
            entity_id: *id,
            alias_key: alias.clone(),
            ambiguous: distinct.len() > 1,
        })
    }
}

/// `key` abbreviates `candidate`: initials only ever on the query side
fn initials_expand_to(key: &str, candidate: &str) -> bool {
    let tk: Vec<&str> = key.split(' ').collect();
    let tc: Vec<&str> = candidate.split(' ').collect();
    if tk.len() < 2 || tk.len() != tc.len() {
        return false;
    }

    let last = tk.len() - 1;
    if tk[last] != tc[last] || tk[last].chars().count() < 2 {
        return false;
    }

    tk[..last].iter().zip(&tc[..last]).all(|(k, c)| k == c || is_initial_of(k, c))
}

fn is_initial_of(initial: &str, word: &str) -> bool {
    let mut chars = initial.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => word.chars().next() == Some(c) && word.chars().count() > 1,
        _ => false,
    }
}
