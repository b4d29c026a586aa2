//! Storage module for persisting cache entries and sessions
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Cache entry persistence, so entries survive a restart
//! - Authenticated session persistence

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::SessionStatus;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Storage handle shared by the content cache and the session manager
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Opens (or creates) a database and wraps it for sharing
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StorageResult<SharedStorage> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// A persisted cache entry
///
/// The payload is the serialized fetch result; its format is owned by the
/// content cache.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    pub id: String,
    pub source_url: String,
    pub params_key: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub site_key: String,
    pub username: String,
    pub status: SessionStatus,
    pub cookies: BTreeMap<String, String>,
    pub established_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl SessionRecord {
    /// Returns true if the session is authenticated and younger than `ttl_secs`
    pub fn is_fresh(&self, ttl_secs: u64, now: DateTime<Utc>) -> bool {
        if !self.status.is_usable() {
            return false;
        }
        match self.established_at {
            Some(at) => (now - at).num_seconds() < ttl_secs as i64,
            None => false,
        }
    }
}
