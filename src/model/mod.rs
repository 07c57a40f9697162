//! Core data model: canonical entities, mentions, relationships, runs

mod analysis;
mod entity;
mod mention;
mod relationship;
mod run;


pub use analysis::{result_type, AnalysisId, AnalysisResult, NewAnalysisResult, TrendPayload};
pub use entity::{CanonicalEntity, EntityId, EntityType, NewEntity};
pub use mention::{
    Article, ArticleId, EntityMention, EntityMentionContext, MentionContextId, MentionId, NewMention, Span,
};
pub use relationship::{EntityPair, EntityRelationship};
pub use run::{
    ErrorDetail, ErrorKind, LogEntry, MentionOutcome, MentionStatus, RunId, RunStatus, RunStep, TrackingState,
    TransitionError,
};
