//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::SessionStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{EntryRecord, SessionRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const ENTRY_COLUMNS: &str = "id, source_url, params_key, payload, created_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.conn.path())
            .finish()
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(id: &str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", value, e),
        })
}

/// Raw entry columns as stored
type EntryRow = (String, String, String, String, String);

fn read_entry_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_entry((id, source_url, params_key, payload, created_at): EntryRow) -> StorageResult<EntryRecord> {
    let created_at = parse_time(&id, &created_at)?;
    Ok(EntryRecord {
        id,
        source_url,
        params_key,
        payload,
        created_at,
    })
}

impl Storage for SqliteStorage {
    // ===== Cache Entries =====

    fn insert_entry(&mut self, entry: &EntryRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cache_entries (id, source_url, params_key, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.source_url,
                entry.params_key,
                entry.payload,
                format_time(&entry.created_at)
            ],
        )?;
        Ok(())
    }

    fn get_entry(&self, id: &str) -> StorageResult<Option<EntryRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM cache_entries WHERE id = ?1", ENTRY_COLUMNS),
                params![id],
                read_entry_row,
            )
            .optional()?;

        row.map(into_entry).transpose()
    }

    fn list_entries(&self) -> StorageResult<Vec<EntryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM cache_entries ORDER BY seq DESC",
            ENTRY_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], read_entry_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(into_entry).collect()
    }

    fn find_entry_by_params(&self, params_key: &str) -> StorageResult<Option<EntryRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM cache_entries WHERE params_key = ?1 ORDER BY seq DESC LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![params_key],
                read_entry_row,
            )
            .optional()?;

        row.map(into_entry).transpose()
    }

    fn delete_entry(&mut self, id: &str) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM cache_entries WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn trim_entries(&mut self, keep: usize) -> StorageResult<Vec<String>> {
        let tx = self.conn.transaction()?;

        let doomed = {
            let mut stmt = tx.prepare(
                "SELECT id FROM cache_entries ORDER BY seq DESC LIMIT -1 OFFSET ?1",
            )?;
            let ids = stmt
                .query_map(params![keep as i64], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        for id in &doomed {
            tx.execute("DELETE FROM cache_entries WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        Ok(doomed)
    }

    fn count_entries(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Sessions =====

    fn save_session(&mut self, session: &SessionRecord) -> StorageResult<()> {
        let cookies = serde_json::to_string(&session.cookies)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO sessions
                (site_key, username, status, cookies, established_at, updated_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.site_key,
                session.username,
                session.status.to_db_string(),
                cookies,
                session.established_at.as_ref().map(format_time),
                format_time(&session.updated_at),
                session.last_error
            ],
        )?;
        Ok(())
    }

    fn load_session(&self, site_key: &str) -> StorageResult<Option<SessionRecord>> {
        type SessionRow = (String, String, String, Option<String>, String, Option<String>);

        let row: Option<SessionRow> = self
            .conn
            .query_row(
                "SELECT username, status, cookies, established_at, updated_at, last_error
                 FROM sessions WHERE site_key = ?1",
                params![site_key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((username, status, cookies, established_at, updated_at, last_error)) = row else {
            return Ok(None);
        };

        let status = SessionStatus::from_db_string(&status).ok_or_else(|| StorageError::Corrupt {
            id: site_key.to_string(),
            reason: format!("unknown session status '{}'", status),
        })?;

        Ok(Some(SessionRecord {
            site_key: site_key.to_string(),
            username,
            status,
            cookies: serde_json::from_str(&cookies)?,
            established_at: established_at
                .map(|t| parse_time(site_key, &t))
                .transpose()?,
            updated_at: parse_time(site_key, &updated_at)?,
            last_error,
        }))
    }

    fn delete_session(&mut self, site_key: &str) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM sessions WHERE site_key = ?1", params![site_key])?;
        Ok(())
    }
}
