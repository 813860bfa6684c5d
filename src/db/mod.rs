//! MongoDB access layer
//!
//! Typed collections with schema-declared indexes. Index creation runs when a
//! collection is opened and doubles as the startup schema migration.

pub mod mongo;
pub mod schemas;

pub use mongo::{is_duplicate_key, IntoIndexes, MongoClient, MongoCollection};
