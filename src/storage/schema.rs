//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Ripple-Crawl database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Cached fetch results
CREATE TABLE IF NOT EXISTS cache_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    source_url TEXT NOT NULL,
    params_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_params ON cache_entries(params_key);
CREATE INDEX IF NOT EXISTS idx_cache_entries_created ON cache_entries(created_at);

-- Authenticated sessions, one per site
CREATE TABLE IF NOT EXISTS sessions (
    site_key TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    status TEXT NOT NULL,
    cookies TEXT NOT NULL,
    established_at TEXT,
    updated_at TEXT NOT NULL,
    last_error TEXT
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
