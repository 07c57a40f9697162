//! Mention normalization
//!
//! Turns a raw surface form into the key used for alias matching. Pure and
//! infallible; degenerate input yields an empty key, which the resolver
//! rejects.

use crate::config::DEFAULT_HONORIFICS;
use crate::model::EntityType;
use std::collections::HashSet;

/// Characters kept inside a key besides letters, digits and spaces
fn is_kept_punctuation(c: char) -> bool {
    matches!(c, '\'' | '-' | '&')
}

#[derive(Debug, Clone)]
pub struct MentionNormalizer {
    honorifics: HashSet<String>,
}

impl MentionNormalizer {
    /// Build a normalizer with the given titles. Titles are matched after
    /// normalization, so "Dr." and "dr" are equivalent.
    pub fn new<I, S>(honorifics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let honorifics = honorifics
            .into_iter()
            .map(|h| Self::fold(h.as_ref()))
            .filter(|h| !h.is_empty())
            .collect();
        Self { honorifics }
    }

    /// Normalized comparison key for a mention.
    ///
    /// Lower-cases, replaces punctuation with spaces, collapses whitespace,
    /// trims leading/trailing punctuation and, for people, drops leading
    /// titles (never the last remaining token).
    pub fn normalize(&self, raw: &str, entity_type: EntityType) -> String {
        let folded = Self::fold(raw);
        if entity_type != EntityType::Person {
            return folded;
        }

        let tokens: Vec<&str> = folded.split(' ').collect();
        let mut start = 0;
        while tokens.len() - start > 1 && self.honorifics.contains(tokens[start]) {
            start += 1;
        }
        tokens[start..].join(" ")
    }

    fn fold(raw: &str) -> String {
        let mapped: String = raw
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() || is_kept_punctuation(c) {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        mapped
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim_matches(|c: char| is_kept_punctuation(c) || c.is_whitespace())
            .to_string()
    }
}

impl Default for MentionNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_HONORIFICS)
    }
}
