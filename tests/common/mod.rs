//! Common test utilities for newsgraph integration tests
//!
//! Fixtures for building articles and extractor output, plus a store
//! wrapper that injects write races and storage failures on demand.

pub mod fixtures;
pub mod racing_store;

#[allow(unused_imports)]
pub use fixtures::{article, day, extract, file_tracker, repeated_article, tracker, tracker_on};
#[allow(unused_imports)]
pub use racing_store::RacingStore;
