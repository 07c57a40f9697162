//! Extractor payloads
//!
//! The NER stage hands over a list of typed spans. Payloads are parsed
//! against a fixed schema: unknown fields, unknown entity types and
//! out-of-range confidences are rejected rather than guessed at. Span bounds
//! are checked later, per mention, against the article text.

use crate::model::{Article, EntityType, Span};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("entity {index}: confidence {value} is not in [0, 1]")]
    Confidence { index: usize, value: f32 },

    #[error("article id is empty")]
    EmptyArticleId,
}

/// One span from the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractedEntity {
    pub surface_text: String,
    pub entity_type: EntityType,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
}

impl ExtractedEntity {
    pub fn new(surface_text: impl Into<String>, entity_type: EntityType, start: usize, end: usize, confidence: f32) -> Self {
        Self {
            surface_text: surface_text.into(),
            entity_type,
            start,
            end,
            confidence,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    /// Spans for `surface` at the first character offset it occurs in `text`
    pub fn locate(text: &str, surface: &str, entity_type: EntityType, confidence: f32) -> Option<Self> {
        let byte_start = text.find(surface)?;
        let start = text[..byte_start].chars().count();
        let end = start + surface.chars().count();
        Some(Self::new(surface, entity_type, start, end, confidence))
    }
}

/// Validate extractor output before a run consumes it.
pub fn validate_entities(entities: &[ExtractedEntity]) -> Result<(), InputError> {
    for (index, entity) in entities.iter().enumerate() {
        if !(0.0..=1.0).contains(&entity.confidence) {
            return Err(InputError::Confidence {
                index,
                value: entity.confidence,
            });
        }
    }
    Ok(())
}

/// An article bundled with its extractor output, as read by the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArticleDocument {
    pub article: Article,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
}

impl ArticleDocument {
    pub fn from_json(json: &str) -> Result<Self, InputError> {
        let doc: ArticleDocument = serde_json::from_str(json)?;
        if doc.article.id.as_str().trim().is_empty() {
            return Err(InputError::EmptyArticleId);
        }
        validate_entities(&doc.entities)?;
        Ok(doc)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, InputError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| InputError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}
