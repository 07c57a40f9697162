//! Article and tracker fixtures

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use newsgraph::{Article, EntityStore, EntityTracker, EntityType, ExtractedEntity, TrackerConfig};
use std::path::Path;
use std::sync::Arc;

/// Noon UTC on the given day of March 2026
pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap()
}

pub fn article(id: &str, text: &str, published_at: DateTime<Utc>) -> Article {
    Article::new(id, text, published_at)
}

/// Extractor output for each `(surface, type)` at its first occurrence in `text`
pub fn extract(text: &str, spans: &[(&str, EntityType)]) -> Vec<ExtractedEntity> {
    spans
        .iter()
        .map(|(surface, entity_type)| {
            ExtractedEntity::locate(text, surface, *entity_type, 0.9)
                .unwrap_or_else(|| panic!("{:?} not found in {:?}", surface, text))
        })
        .collect()
}

/// An article that mentions `surface` exactly `times` times, with one span per mention
pub fn repeated_article(
    id: &str,
    surface: &str,
    entity_type: EntityType,
    times: usize,
    published_at: DateTime<Utc>,
) -> (Article, Vec<ExtractedEntity>) {
    let sentence = format!("{} said so. ", surface);
    let stride = sentence.chars().count();
    let len = surface.chars().count();
    let text = sentence.repeat(times);
    let spans = (0..times)
        .map(|i| ExtractedEntity::new(surface, entity_type, i * stride, i * stride + len, 0.9))
        .collect();
    (Article::new(id, text, published_at), spans)
}

pub fn tracker() -> EntityTracker {
    EntityTracker::in_memory(TrackerConfig::default()).unwrap()
}

pub fn tracker_on(store: Arc<dyn EntityStore>) -> EntityTracker {
    EntityTracker::new(store, TrackerConfig::default()).unwrap()
}

/// A tracker with its own connection to a shared database file
pub fn file_tracker(path: &Path) -> EntityTracker {
    EntityTracker::open(path, TrackerConfig::default()).unwrap()
}
