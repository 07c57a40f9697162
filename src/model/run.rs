//! Per-article tracking runs and their state machine
//!
//! ```text
//! INITIALIZED → EXTRACTING → RESOLVING → AGGREGATING → COMPLETED
//!      └────────────┴────────────┴────────────┴──────→ FAILED
//! ```
//!
//! A run is mutated only by the engine that owns it and persisted after
//! every transition. Terminal runs are kept for audit and replay.

use super::entity::EntityId;
use super::mention::{ArticleId, MentionContextId, MentionId, Span};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Initialized,
    Extracting,
    Resolving,
    Aggregating,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Extracting => "EXTRACTING",
            Self::Resolving => "RESOLVING",
            Self::Aggregating => "AGGREGATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward edges of the state machine, plus `FAILED` from any live state.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Initialized, Extracting)
            | (Extracting, Resolving)
            | (Resolving, Aggregating)
            | (Aggregating, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIALIZED" => Ok(Self::Initialized),
            "EXTRACTING" => Ok(Self::Extracting),
            "RESOLVING" => Ok(Self::Resolving),
            "AGGREGATING" => Ok(Self::Aggregating),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("unknown run status: {}", s)),
        }
    }
}

/// The step a log entry or error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    Extraction,
    Resolution,
    Relationships,
    Context,
    Completion,
}

impl std::fmt::Display for RunStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Extraction => "extraction",
            Self::Resolution => "resolution",
            Self::Relationships => "relationships",
            Self::Context => "context",
            Self::Completion => "completion",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidMention,
    InvalidSpan,
    ResolutionConflict,
    PersistenceFailure,
    InvalidInput,
    /// A step tried an illegal state change; a bug, not bad input
    InvalidTransition,
    Cancelled,
}

/// Structured error captured on a failed run or a failed mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub step: RunStep,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>, step: RunStep) -> Self {
        Self {
            kind,
            message: message.into(),
            step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub step: RunStep,
    pub message: String,
}

/// What happened to one extracted span during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MentionStatus {
    Resolved {
        entity_id: EntityId,
        mention_id: MentionId,
        /// Carried over from an earlier run of the same article
        #[serde(default)]
        reused: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_id: Option<MentionContextId>,
    },
    /// Recovered locally: the span was unusable and was left out
    Skipped { kind: ErrorKind, message: String },
    /// The span could not be resolved; the run carried on without it
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionOutcome {
    /// Position in the extractor output
    pub index: usize,
    pub surface_text: String,
    pub span: Span,
    #[serde(flatten)]
    pub status: MentionStatus,
}

impl MentionOutcome {
    pub fn resolved_ids(&self) -> Option<(EntityId, MentionId)> {
        match self.status {
            MentionStatus::Resolved {
                entity_id,
                mention_id,
                ..
            } => Some((entity_id, mention_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid run transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// The per-article run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub run_id: RunId,
    pub article_id: ArticleId,
    pub status: RunStatus,
    pub log: Vec<LogEntry>,
    pub mentions: Vec<MentionOutcome>,
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackingState {
    pub fn new(article_id: ArticleId) -> Self {
        let now = Utc::now();
        Self {
            run_id: RunId::new(),
            article_id,
            status: RunStatus::Initialized,
            log: Vec::new(),
            mentions: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn transition(&mut self, next: RunStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `FAILED` with the given detail. No-op on a terminal run.
    pub fn fail(&mut self, detail: ErrorDetail) {
        if self.is_terminal() {
            return;
        }
        self.push_log(detail.step, format!("failed: {}", detail.message));
        self.error = Some(detail);
        self.status = RunStatus::Failed;
        self.updated_at = Utc::now();
    }

    pub fn push_log(&mut self, step: RunStep, message: impl Into<String>) {
        let at = Utc::now();
        self.log.push(LogEntry {
            at,
            step,
            message: message.into(),
        });
        self.updated_at = at;
    }

    pub fn record_outcome(&mut self, outcome: MentionOutcome) {
        self.mentions.push(outcome);
        self.updated_at = Utc::now();
    }

    /// Spans this run resolved, keyed by span.
    pub fn resolved_spans(&self) -> HashMap<Span, (EntityId, MentionId)> {
        self.mentions
            .iter()
            .filter_map(|m| m.resolved_ids().map(|ids| (m.span, ids)))
            .collect()
    }

    /// Distinct canonical entities resolved in this run.
    pub fn resolved_entities(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .mentions
            .iter()
            .filter_map(|m| m.resolved_ids().map(|(entity, _)| entity))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn count_with_kind(&self, kind: ErrorKind) -> usize {
        self.mentions
            .iter()
            .filter(|m| match &m.status {
                MentionStatus::Skipped { kind: k, .. } | MentionStatus::Failed { kind: k, .. } => *k == kind,
                MentionStatus::Resolved { .. } => false,
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut state = TrackingState::new(ArticleId::new("a1"));
        for next in [
            RunStatus::Extracting,
            RunStatus::Resolving,
            RunStatus::Aggregating,
            RunStatus::Completed,
        ] {
            state.transition(next).unwrap();
        }
        assert!(state.is_terminal());
        assert!(state.error.is_none());
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut state = TrackingState::new(ArticleId::new("a1"));
        let err = state.transition(RunStatus::Resolving).unwrap_err();
        assert_eq!(err.from, RunStatus::Initialized);
        assert_eq!(state.status, RunStatus::Initialized);
    }

    #[test]
    fn failed_reachable_from_every_live_state() {
        for from in [
            RunStatus::Initialized,
            RunStatus::Extracting,
            RunStatus::Resolving,
            RunStatus::Aggregating,
        ] {
            assert!(from.can_transition_to(RunStatus::Failed), "{}", from);
        }
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Failed));
    }

    #[test]
    fn fail_captures_detail_and_is_sticky() {
        let mut state = TrackingState::new(ArticleId::new("a1"));
        state.transition(RunStatus::Extracting).unwrap();
        state.fail(ErrorDetail::new(
            ErrorKind::PersistenceFailure,
            "disk gone",
            RunStep::Resolution,
        ));
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_ref().unwrap().step, RunStep::Resolution);

        state.fail(ErrorDetail::new(ErrorKind::Cancelled, "late", RunStep::Context));
        assert_eq!(state.error.unwrap().kind, ErrorKind::PersistenceFailure);
    }

    #[test]
    fn outcomes_serialize_with_flattened_status() {
        let outcome = MentionOutcome {
            index: 0,
            surface_text: "Jane Doe".to_string(),
            span: Span::new(0, 8),
            status: MentionStatus::Skipped {
                kind: ErrorKind::InvalidSpan,
                message: "out of bounds".to_string(),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["kind"], "invalid_span");

        let back: MentionOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn resolved_spans_ignore_skipped_mentions() {
        let mut state = TrackingState::new(ArticleId::new("a1"));
        state.record_outcome(MentionOutcome {
            index: 0,
            surface_text: "Acme".to_string(),
            span: Span::new(0, 4),
            status: MentionStatus::Resolved {
                entity_id: EntityId::from_raw(1),
                mention_id: MentionId::from_raw(10),
                reused: false,
                context_id: None,
            },
        });
        state.record_outcome(MentionOutcome {
            index: 1,
            surface_text: "".to_string(),
            span: Span::new(5, 6),
            status: MentionStatus::Skipped {
                kind: ErrorKind::InvalidMention,
                message: "empty".to_string(),
            },
        });
        let spans = state.resolved_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[&Span::new(0, 4)].0, EntityId::from_raw(1));
        assert_eq!(state.count_with_kind(ErrorKind::InvalidMention), 1);
    }
}
