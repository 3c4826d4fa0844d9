//! Local persistence store.
//!
//! A versioned SQLite database with five independent collections
//! (resources, favorites, notes, downloads, settings). Each operation touches
//! one collection; workflows spanning several collections (import, clear)
//! run as a sequence of single-collection writes with no rollback.

pub mod collection;
pub mod database;
pub mod local;
pub mod schema;
pub mod snapshot;
pub mod types;

pub use local::LocalStore;
pub use snapshot::Snapshot;
pub use types::{Download, Note, Resource, ResourceId};
