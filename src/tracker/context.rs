//! Context recorder
//!
//! Keeps the text surrounding each mention so a reader can see how an
//! entity was referred to. Windows are measured in characters, the same
//! unit as span offsets.

use crate::model::{MentionContextId, MentionId, Span};
use crate::resolve::MentionError;
use crate::storage::EntityStore;
use std::sync::Arc;

/// Slice `window_size` characters either side of `span`, clipped to the text.
pub fn context_window(text: &str, span: Span, window_size: usize) -> Result<String, MentionError> {
    let article_len = text.chars().count();
    if !span.fits(article_len) {
        return Err(MentionError::InvalidSpan { span, article_len });
    }

    let start = span.start.saturating_sub(window_size);
    let end = span.end.saturating_add(window_size).min(article_len);
    Ok(text.chars().skip(start).take(end - start).collect())
}

pub struct ContextRecorder {
    store: Arc<dyn EntityStore>,
    window_size: usize,
}

impl ContextRecorder {
    pub fn new(store: Arc<dyn EntityStore>, window_size: usize) -> Self {
        Self { store, window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Store the window for a mention. A mention that already has a context
    /// keeps it.
    pub fn record(&self, mention_id: MentionId, text: &str, span: Span) -> Result<MentionContextId, MentionError> {
        let window = context_window(text, span, self.window_size)?;
        Ok(self.store.insert_context(mention_id, &window, self.window_size)?)
    }
}
