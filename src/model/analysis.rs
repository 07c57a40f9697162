//! Computed analysis artifacts

use super::entity::EntityId;
use super::mention::ArticleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known result type tags
pub mod result_type {
    /// Mention-frequency spike for one canonical entity
    pub const ENTITY_TREND: &str = "entity_trend";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(i64);

impl AnalysisId {
    pub fn from_raw(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable computed artifact tied to an entity or article.
///
/// Recomputation appends a new row whose `supersedes` names the previous
/// result of the same type for the same subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: AnalysisId,
    pub result_type: String,
    pub entity_id: Option<EntityId>,
    pub article_id: Option<ArticleId>,
    pub payload: serde_json::Value,
    pub supersedes: Option<AnalysisId>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Decode the payload of an `entity_trend` result.
    pub fn trend_payload(&self) -> Option<TrendPayload> {
        if self.result_type != result_type::ENTITY_TREND {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// An analysis result about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnalysisResult {
    pub result_type: String,
    pub entity_id: Option<EntityId>,
    pub article_id: Option<ArticleId>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to reproduce a trend decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPayload {
    /// Mention counts per bucket, oldest first; the last bucket is the one tested
    pub counts: Vec<u64>,
    pub mean: f64,
    pub std_dev: f64,
    pub k: f64,
    pub threshold: f64,
    pub score: f64,
    pub bucket_seconds: i64,
    pub window_start: DateTime<Utc>,
    pub as_of: DateTime<Utc>,
}
