//! Entity resolution
//!
//! Normalization, exact and fuzzy matching, and create-or-merge against the
//! store's alias index.

mod fuzzy;
mod normalize;
mod resolver;

pub use fuzzy::{FuzzyMatch, FuzzyMatcher};
pub use normalize::MentionNormalizer;
pub use resolver::{EntityResolver, MentionRequest, Resolution, ResolutionKind};

use crate::model::{ErrorKind, Span};
use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while handling a single mention
#[derive(Debug, Error)]
pub enum MentionError {
    #[error("mention {surface:?} normalizes to an empty key")]
    InvalidMention { surface: String },

    #[error("span {span} is outside an article of {article_len} characters")]
    InvalidSpan { span: Span, article_len: usize },

    /// The create race did not settle within the retry budget
    #[error("write race on {subject} persisted after {attempts} attempts")]
    ResolutionConflict { subject: String, attempts: usize },

    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

impl MentionError {
    /// Everything except a storage failure is confined to one mention.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, MentionError::Persistence(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MentionError::InvalidMention { .. } => ErrorKind::InvalidMention,
            MentionError::InvalidSpan { .. } => ErrorKind::InvalidSpan,
            MentionError::ResolutionConflict { .. } => ErrorKind::ResolutionConflict,
            MentionError::Persistence(_) => ErrorKind::PersistenceFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_persistence_is_fatal() {
        let invalid = MentionError::InvalidMention { surface: "..".into() };
        assert!(invalid.is_recoverable());
        assert_eq!(invalid.kind(), ErrorKind::InvalidMention);

        let race = MentionError::ResolutionConflict {
            subject: "jane doe (PERSON)".into(),
            attempts: 2,
        };
        assert!(race.is_recoverable());

        let storage = MentionError::from(StorageError::LockPoisoned);
        assert!(!storage.is_recoverable());
        assert_eq!(storage.kind(), ErrorKind::PersistenceFailure);
    }

    #[test]
    fn span_error_message_names_bounds() {
        let err = MentionError::InvalidSpan {
            span: Span::new(10, 1000),
            article_len: 50,
        };
        assert_eq!(err.to_string(), "span 10..1000 is outside an article of 50 characters");
    }
}
