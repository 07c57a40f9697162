//! Co-occurrence relationships between canonical entities

use super::entity::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An unordered pair of distinct entities, stored with the lower id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityPair {
    a: EntityId,
    b: EntityId,
}

impl EntityPair {
    /// Canonicalize a pair. Returns `None` for a self-pair.
    pub fn new(x: EntityId, y: EntityId) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self { a: x, b: y }),
            std::cmp::Ordering::Greater => Some(Self { a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn a(&self) -> EntityId {
        self.a
    }

    pub fn b(&self) -> EntityId {
        self.b
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.a == id || self.b == id
    }

    /// The other endpoint, if `id` is part of the pair.
    pub fn other(&self, id: EntityId) -> Option<EntityId> {
        if self.a == id {
            Some(self.b)
        } else if self.b == id {
            Some(self.a)
        } else {
            None
        }
    }

    /// Every unordered pair drawn from the distinct ids, in ascending order.
    pub fn all_pairs(ids: impl IntoIterator<Item = EntityId>) -> Vec<EntityPair> {
        let distinct: Vec<EntityId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let mut pairs = Vec::new();
        for i in 0..distinct.len() {
            for j in (i + 1)..distinct.len() {
                pairs.push(Self {
                    a: distinct[i],
                    b: distinct[j],
                });
            }
        }
        pairs
    }
}

impl std::fmt::Display for EntityPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.a, self.b)
    }
}

/// Undirected co-occurrence edge.
///
/// `count` is the number of distinct articles mentioning both entities;
/// it never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub pair: EntityPair,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> EntityId {
        EntityId::from_raw(n)
    }

    #[test]
    fn pair_is_order_insensitive() {
        assert_eq!(EntityPair::new(id(7), id(2)), EntityPair::new(id(2), id(7)));
        let pair = EntityPair::new(id(7), id(2)).unwrap();
        assert_eq!(pair.a(), id(2));
        assert_eq!(pair.b(), id(7));
    }

    #[test]
    fn self_pair_is_rejected() {
        assert!(EntityPair::new(id(4), id(4)).is_none());
    }

    #[test]
    fn all_pairs_deduplicates_repeated_mentions() {
        // An entity mentioned five times still pairs once with each other entity
        let pairs = EntityPair::all_pairs(vec![id(3), id(1), id(3), id(3), id(2), id(3), id(3)]);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], EntityPair::new(id(1), id(2)).unwrap());
        assert_eq!(pairs[2], EntityPair::new(id(2), id(3)).unwrap());
    }

    #[test]
    fn other_endpoint() {
        let pair = EntityPair::new(id(1), id(9)).unwrap();
        assert_eq!(pair.other(id(1)), Some(id(9)));
        assert_eq!(pair.other(id(5)), None);
    }
}
