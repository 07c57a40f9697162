//! Storage backends
//!
//! The engine talks to persistence through the `EntityStore` trait. The
//! primary implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{EntityFilter, EntityStore, IncrementOutcome, OpenStore, StorageError, StorageResult};
