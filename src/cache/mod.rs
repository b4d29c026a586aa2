//! Content cache for fetch results
//!
//! Entries are addressed by a short hex id derived from the request that
//! produced them. The in-memory index is always authoritative for this
//! process; when a database is configured every entry is also written
//! through to SQLite so that ids stay resolvable after a restart.

use crate::config::CacheConfig;
use crate::render::{FetchResult, RenderConfig};
use crate::state::FetchStatus;
use crate::storage::{EntryRecord, SharedStorage, Storage, StorageError};
use crate::url::normalize_url;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Hex characters kept from the id digest
const ID_LEN: usize = 12;

/// Errors returned by the content cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("No cache entry with id '{0}'")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// The request that produced a result
#[derive(Debug, Clone, Default)]
pub struct CacheParams {
    pub url: String,
    pub config: RenderConfig,
    /// Always create a new entry, even if an identical request is cached
    pub bypass: bool,
}

impl CacheParams {
    pub fn new(url: impl Into<String>, config: RenderConfig) -> Self {
        Self {
            url: url.into(),
            config,
            bypass: false,
        }
    }

    /// Normalized form of the request used for deduplication
    ///
    /// The URL is normalized the same way the crawler normalizes links, and
    /// cookies are left out so that a rotated session cookie does not defeat
    /// deduplication.
    pub fn key(&self) -> String {
        #[derive(Serialize)]
        struct Key<'a> {
            url: &'a str,
            config: &'a RenderConfig,
        }

        let url = normalize_url(&self.url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.url.trim().to_string());
        let mut config = self.config.clone();
        config.cookies.clear();

        serde_json::to_string(&Key {
            url: &url,
            config: &config,
        })
        .unwrap_or(url)
    }
}

/// A stored result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: String,
    pub source_url: String,
    pub params_key: String,
    pub result: FetchResult,
    pub created_at: DateTime<Utc>,
}

/// Listing view of an entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub status: FetchStatus,
    pub links_found: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&CacheEntry> for EntrySummary {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            id: entry.id.clone(),
            source_url: entry.source_url.clone(),
            title: entry.result.title.clone(),
            status: entry.result.status,
            links_found: entry.result.links.len(),
            created_at: entry.created_at,
        }
    }
}

/// Optional restrictions for [`ContentCache::list`]
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Keep entries whose source URL contains this substring
    pub url_contains: Option<String>,
    /// Keep entries created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Keep entries created before this instant
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ListFilter {
    fn matches(&self, source_url: &str, created_at: DateTime<Utc>) -> bool {
        if let Some(needle) = &self.url_contains {
            if !source_url.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if created_at >= until {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Ids in insertion order, oldest first
    order: VecDeque<String>,
    /// params key -> id of the newest entry for it
    by_params: HashMap<String, String>,
    counter: u64,
}

impl Inner {
    fn forget(&mut self, id: &str) {
        if let Some(entry) = self.entries.remove(id) {
            if self.by_params.get(&entry.params_key).map(String::as_str) == Some(id) {
                self.by_params.remove(&entry.params_key);
            }
        }
        self.order.retain(|existing| existing != id);
    }
}

/// Shared store of fetch results
///
/// All operations take one lock, so `put` and eviction are serialized
/// against `get` and `list` across concurrent crawl runs.
pub struct ContentCache {
    inner: Mutex<Inner>,
    storage: Option<SharedStorage>,
    dedup: bool,
    dedup_window: Duration,
    capacity: Option<usize>,
}

impl ContentCache {
    /// Creates a cache
    ///
    /// # Arguments
    ///
    /// * `config` - The `[cache]` configuration section
    /// * `storage` - Database for write-through persistence, if any
    pub fn new(config: &CacheConfig, storage: Option<SharedStorage>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            storage,
            dedup: config.dedup,
            dedup_window: Duration::seconds(config.dedup_window_secs.min(u32::MAX as u64) as i64),
            capacity: config.capacity,
        }
    }

    /// Creates a memory-only cache with default settings
    pub fn in_memory() -> Self {
        Self::new(&CacheConfig::default(), None)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_storage<T>(
        &self,
        f: impl FnOnce(&mut dyn Storage) -> Result<T, StorageError>,
    ) -> Result<Option<T>, CacheError> {
        match &self.storage {
            Some(storage) => {
                let mut guard = storage.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(Some(f(&mut *guard)?))
            }
            None => Ok(None),
        }
    }

    fn within_window(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - created_at < self.dedup_window
    }

    /// Stores a result and returns its id
    ///
    /// With deduplication enabled, a request whose parameters match an
    /// entry created within the dedup window returns that entry's id and
    /// stores nothing, unless `params.bypass` is set.
    pub fn put(&self, params: &CacheParams, result: FetchResult) -> Result<String, CacheError> {
        let key = params.key();
        let now = Utc::now();
        let mut inner = self.lock();

        if self.dedup && !params.bypass {
            if let Some(id) = inner.by_params.get(&key) {
                if let Some(entry) = inner.entries.get(id) {
                    if self.within_window(entry.created_at, now) {
                        tracing::debug!("Cache hit for {} -> {}", params.url, id);
                        return Ok(id.clone());
                    }
                }
            }

            let persisted = self.with_storage(|s| s.find_entry_by_params(&key))?.flatten();
            if let Some(record) = persisted {
                if self.within_window(record.created_at, now) {
                    tracing::debug!("Persisted cache hit for {} -> {}", params.url, record.id);
                    return Ok(record.id);
                }
            }
        }

        let id = loop {
            inner.counter += 1;
            let candidate = derive_id(&key, inner.counter, now);
            let taken = inner.entries.contains_key(&candidate)
                || self
                    .with_storage(|s| s.get_entry(&candidate))?
                    .flatten()
                    .is_some();
            if !taken {
                break candidate;
            }
        };

        // Cookies may hold session credentials
        let mut result = result;
        result.cookies.clear();

        let entry = CacheEntry {
            id: id.clone(),
            source_url: params.url.clone(),
            params_key: key.clone(),
            result,
            created_at: now,
        };

        if self.storage.is_some() {
            let record = EntryRecord {
                id: id.clone(),
                source_url: entry.source_url.clone(),
                params_key: key.clone(),
                payload: serde_json::to_string(&entry.result)?,
                created_at: now,
            };
            self.with_storage(|s| s.insert_entry(&record))?;
        }

        inner.entries.insert(id.clone(), entry);
        inner.order.push_back(id.clone());
        inner.by_params.insert(key, id.clone());

        if let Some(capacity) = self.capacity {
            while inner.order.len() > capacity {
                if let Some(oldest) = inner.order.front().cloned() {
                    tracing::debug!("Evicting cache entry {}", oldest);
                    inner.forget(&oldest);
                }
            }
            if let Some(removed) = self.with_storage(|s| s.trim_entries(capacity))? {
                for removed_id in removed {
                    inner.forget(&removed_id);
                }
            }
        }

        Ok(id)
    }

    /// Looks up an entry by id
    ///
    /// # Returns
    ///
    /// * `Ok(CacheEntry)` - The stored entry
    /// * `Err(CacheError::NotFound)` - The id is unknown or was evicted
    pub fn get(&self, id: &str) -> Result<CacheEntry, CacheError> {
        let inner = self.lock();
        if let Some(entry) = inner.entries.get(id) {
            return Ok(entry.clone());
        }

        match self.with_storage(|s| s.get_entry(id))?.flatten() {
            Some(record) => record_to_entry(record),
            None => Err(CacheError::NotFound(id.to_string())),
        }
    }

    /// Lists entries, newest first
    ///
    /// With persistence enabled this includes entries written by earlier
    /// processes.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<EntrySummary>, CacheError> {
        let inner = self.lock();
        let limit = filter.limit.unwrap_or(usize::MAX);

        let summaries = match self.with_storage(|s| s.list_entries())? {
            Some(records) => {
                let mut summaries = Vec::new();
                for record in records {
                    if summaries.len() >= limit {
                        break;
                    }
                    if !filter.matches(&record.source_url, record.created_at) {
                        continue;
                    }
                    let summary = match inner.entries.get(&record.id) {
                        Some(entry) => EntrySummary::from(entry),
                        None => EntrySummary::from(&record_to_entry(record)?),
                    };
                    summaries.push(summary);
                }
                summaries
            }
            None => inner
                .order
                .iter()
                .rev()
                .filter_map(|id| inner.entries.get(id))
                .filter(|entry| filter.matches(&entry.source_url, entry.created_at))
                .take(limit)
                .map(EntrySummary::from)
                .collect(),
        };

        Ok(summaries)
    }

    /// Number of entries held in memory
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn derive_id(key: &str, counter: u64, now: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(counter.to_le_bytes());
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(ID_LEN);
    id
}

fn record_to_entry(record: EntryRecord) -> Result<CacheEntry, CacheError> {
    let result: FetchResult = serde_json::from_str(&record.payload)?;
    Ok(CacheEntry {
        id: record.id,
        source_url: record.source_url,
        params_key: record.params_key,
        result,
        created_at: record.created_at,
    })
}
