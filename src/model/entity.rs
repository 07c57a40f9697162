//! Canonical entity representation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a canonical entity.
///
/// Assigned by the store. Ids are totally ordered; ties between entities
/// are always broken toward the lower id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    pub fn from_raw(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity type as reported by the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Event,
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Event,
        EntityType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::Event => "EVENT",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entity type: {}", s))
    }
}

/// The identity record for a real-world entity.
///
/// `(normalized_name, entity_type)` is unique across the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: EntityId,
    /// Display name: the surface form that first created the entity
    pub canonical_name: String,
    /// Normalized form of the canonical name
    pub normalized_name: String,
    pub entity_type: EntityType,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Every raw surface form seen for this entity
    pub aliases: BTreeSet<String>,
}

impl CanonicalEntity {
    pub fn has_alias(&self, surface: &str) -> bool {
        self.aliases.contains(surface)
    }
}

/// A canonical entity that has not been persisted yet.
///
/// The first surface form becomes both the canonical name and the sole alias.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub canonical_name: String,
    pub normalized_name: String,
    pub entity_type: EntityType,
    pub seen_at: DateTime<Utc>,
}

impl NewEntity {
    pub fn new(
        canonical_name: impl Into<String>,
        normalized_name: impl Into<String>,
        entity_type: EntityType,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            normalized_name: normalized_name.into(),
            entity_type,
            seen_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_through_str() {
        for t in EntityType::ALL {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), t);
        }
        assert!("person".parse::<EntityType>().is_err());
    }

    #[test]
    fn entity_type_serializes_upper_case() {
        let json = serde_json::to_string(&EntityType::Organization).unwrap();
        assert_eq!(json, "\"ORGANIZATION\"");
    }

    #[test]
    fn entity_ids_order_by_value() {
        assert!(EntityId::from_raw(3) < EntityId::from_raw(10));
    }
}
