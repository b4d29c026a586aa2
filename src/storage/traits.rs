//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{EntryRecord, SessionRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Cache entries are keyed by their string id and ordered by insertion;
/// sessions are keyed by site.
pub trait Storage {
    // ===== Cache Entries =====

    /// Inserts a cache entry; an existing entry with the same id is replaced
    fn insert_entry(&mut self, entry: &EntryRecord) -> StorageResult<()>;

    /// Gets an entry by id
    fn get_entry(&self, id: &str) -> StorageResult<Option<EntryRecord>>;

    /// Lists entries, newest first
    fn list_entries(&self) -> StorageResult<Vec<EntryRecord>>;

    /// Finds the newest entry produced by identical request parameters
    fn find_entry_by_params(&self, params_key: &str) -> StorageResult<Option<EntryRecord>>;

    /// Deletes an entry, returning whether it existed
    fn delete_entry(&mut self, id: &str) -> StorageResult<bool>;

    /// Deletes the oldest entries until at most `keep` remain
    ///
    /// # Returns
    ///
    /// The ids that were deleted
    fn trim_entries(&mut self, keep: usize) -> StorageResult<Vec<String>>;

    /// Gets total entry count
    fn count_entries(&self) -> StorageResult<u64>;

    // ===== Sessions =====

    /// Saves a session, replacing any previous one for the same site
    fn save_session(&mut self, session: &SessionRecord) -> StorageResult<()>;

    /// Loads the session for a site
    fn load_session(&self, site_key: &str) -> StorageResult<Option<SessionRecord>>;

    /// Removes the session for a site
    fn delete_session(&mut self, site_key: &str) -> StorageResult<()>;
}
