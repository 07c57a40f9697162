//! newsgraph: entity resolution and tracking for news article streams
//!
//! Consumes named-entity spans extracted from articles and maintains a
//! persistent, deduplicated view of who and what the news is about.
//!
//! # Core Concepts
//!
//! - **Canonical entities**: one record per real-world entity, reached from
//!   any of its surface forms through a persisted alias index
//! - **Mentions**: every resolved span, with the text around it
//! - **Relationships**: co-mention counts between entities, one per article
//! - **Trends**: entities whose mention rate spikes above their baseline
//! - **Runs**: a persisted state machine per article, the unit of retry
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use newsgraph::{Article, EntityTracker, EntityType, ExtractedEntity, RunStatus, TrackerConfig};
//!
//! let tracker = EntityTracker::in_memory(TrackerConfig::default()).unwrap();
//! let article = Article::new("a1", "Jane Doe joined Acme Corp.", Utc::now());
//! let spans = vec![
//!     ExtractedEntity::new("Jane Doe", EntityType::Person, 0, 8, 0.97),
//!     ExtractedEntity::new("Acme Corp", EntityType::Organization, 16, 25, 0.91),
//! ];
//!
//! let run = tracker.process_article(&article, &spans);
//! assert_eq!(run.status, RunStatus::Completed);
//! ```

pub mod config;
pub mod model;
pub mod resolve;
pub mod storage;
pub mod tracker;

pub use config::{ConfigError, TrackerConfig};
pub use model::{
    AnalysisResult, Article, ArticleId, CanonicalEntity, EntityId, EntityMention, EntityMentionContext, EntityPair,
    EntityRelationship, EntityType, ErrorDetail, ErrorKind, MentionId, MentionStatus, RunId, RunStatus, RunStep, Span,
    TrackingState, TrendPayload,
};
pub use resolve::{EntityResolver, MentionError, MentionNormalizer};
pub use storage::{EntityStore, OpenStore, SqliteStore, StorageError, StorageResult};
pub use tracker::{
    ArticleDocument, CancellationToken, EntityTracker, ExtractedEntity, RunDispatcher, TokioDispatcher, TrackerError,
    TrackerResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
