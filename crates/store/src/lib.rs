//! Filesystem-backed document collections.
//!
//! Append-only JSONL files replayed last-wins into memory on open, with
//! tombstone deletes and periodic compaction. One file per named collection.

pub mod collection;
pub mod database;
pub mod error;

pub use {
    collection::Collection,
    database::{COLLECTION_NAMES, DEFAULT_COMPACTION_INTERVAL, Database},
    error::{Error, Result},
};
