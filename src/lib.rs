//! Ripple-Crawl: a policy-driven crawl orchestration engine
//!
//! This crate decides which pages get fetched, in what order, under what
//! concurrency and memory ceiling, with what authenticated session state, and
//! how the outcomes are stored and found again. Page rendering itself sits
//! behind the [`render::RenderClient`] trait.

pub mod batch;
pub mod cache;
pub mod config;
pub mod crawler;
pub mod output;
pub mod render;
pub mod session;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Ripple-Crawl operations
///
/// Only configuration problems and storage failures surface here. Per-page
/// fetch and login failures are attached to the task that produced them and
/// never abort a run.
#[derive(Debug, Error)]
pub enum RippleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("Authentication error: {0}")]
    Auth(#[from] session::AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Ripple-Crawl operations
pub type Result<T> = std::result::Result<T, RippleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use batch::{BatchController, BatchReport, MemoryPolicy, TaskError, TaskOutcome};
pub use cache::{CacheEntry, CacheParams, ContentCache};
pub use config::Config;
pub use crawler::{CrawlReport, CrawlScheduler, CrawlStrategy, CrawlTask};
pub use render::{FetchError, FetchResult, HttpRenderClient, RenderClient, RenderConfig};
pub use session::{AuthError, Credentials, Session, SessionManager};
pub use state::{FetchStatus, SessionStatus};
pub use crate::url::{extract_domain, matches_wildcard, normalize_url};
