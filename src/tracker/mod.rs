//! Article processing
//!
//! `EntityTracker` drives each article through resolution, relationship
//! building and context recording under a persisted state machine, and
//! serves the read-only views over the result. Trend detection runs as a
//! separate pass.

mod cancel;
mod context;
mod dispatch;
mod engine;
mod input;
mod relationships;
mod trends;

pub use cancel::CancellationToken;
pub use context::{context_window, ContextRecorder};
pub use dispatch::{DispatchError, RunDispatcher, TokioDispatcher};
pub use engine::{EntityTracker, TrackerError, TrackerResult};
pub use input::{validate_entities, ArticleDocument, ExtractedEntity, InputError};
pub use relationships::{PairOutcome, RelationshipBuilder, RelationshipUpdate};
pub use trends::{evaluate, Timeline, TrendAggregator, TrendStats, TrendWindow};
