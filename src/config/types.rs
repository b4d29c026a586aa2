use crate::crawler::CrawlStrategy;
use serde::Deserialize;
use std::fmt;

/// Main configuration structure for Ripple-Crawl
///
/// Every section is optional in the file; missing sections take their
/// defaults. The `crawl` command additionally needs `crawler.start-url`
/// (from the file or the command line).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: Vec<AuthEntry>,
}

/// Traversal policy for deep crawls
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// URL the traversal starts from
    #[serde(rename = "start-url", default)]
    pub start_url: Option<String>,

    /// Frontier ordering
    #[serde(default)]
    pub strategy: CrawlStrategy,

    /// Maximum link hops from the start URL
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of pages dispatched in one run
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Host allow-list (exact hosts or `*.example.com`); empty allows every host
    #[serde(rename = "allowed-domains", default)]
    pub allowed_domains: Vec<String>,

    /// Keywords used to score links for best-first traversal
    #[serde(rename = "keyword-focus", default)]
    pub keyword_focus: Vec<String>,

    /// Regexes; when non-empty a link must match at least one
    #[serde(rename = "include-patterns", default)]
    pub include_patterns: Vec<String>,

    /// Regexes; a link matching any of them is pruned
    #[serde(rename = "exclude-patterns", default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            start_url: None,
            strategy: CrawlStrategy::default(),
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            allowed_domains: Vec::new(),
            keyword_focus: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// Concurrency, memory and retry limits for the batch controller
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of fetches in flight
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// System memory usage (percent) above which no new task is admitted
    #[serde(
        rename = "memory-threshold-percent",
        default = "default_memory_threshold"
    )]
    pub memory_threshold_percent: f64,

    /// How long to wait before sampling memory again under pressure
    #[serde(rename = "check-interval-ms", default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Longest admission delay when nothing else is in flight
    #[serde(rename = "max-backoff-ms", default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Extra attempts allowed for a retryable fetch failure
    #[serde(rename = "retry-budget", default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Overall deadline for one batch run; 0 disables it
    #[serde(rename = "batch-timeout-ms", default)]
    pub batch_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            memory_threshold_percent: default_memory_threshold(),
            check_interval_ms: default_check_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_budget: default_retry_budget(),
            batch_timeout_ms: 0,
        }
    }
}

/// HTTP renderer settings
#[derive(Debug, Clone, Deserialize)]
pub struct RenderSettings {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-fetch timeout
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(rename = "connect-timeout-ms", default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Refuse plain-http URLs
    #[serde(rename = "https-only", default)]
    pub https_only: bool,

    /// CSS selector every page must contain before it counts as rendered
    #[serde(rename = "wait-for", default)]
    pub wait_for: Option<String>,

    /// Delay between re-fetches while waiting for `wait-for`
    #[serde(rename = "wait-poll-ms", default = "default_wait_poll_ms")]
    pub wait_poll_ms: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_redirects: default_max_redirects(),
            https_only: false,
            wait_for: None,
            wait_poll_ms: default_wait_poll_ms(),
        }
    }
}

/// Content cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// SQLite database for persistent entries and sessions; absent keeps everything in memory
    #[serde(rename = "database-path", default)]
    pub database_path: Option<String>,

    /// Return the existing id for a repeated request with identical parameters
    #[serde(default = "default_true")]
    pub dedup: bool,

    /// How long an entry stays eligible for dedup
    #[serde(rename = "dedup-window-secs", default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Maximum number of entries; oldest are evicted first
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            dedup: true,
            dedup_window_secs: default_dedup_window_secs(),
            capacity: None,
        }
    }
}

/// Credentials and login form description for one protected site
#[derive(Clone, Deserialize)]
pub struct AuthEntry {
    /// Host pattern the entry applies to (`app.example.com` or `*.example.com`)
    pub site: String,

    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Environment variable holding the password
    #[serde(rename = "password-env", default)]
    pub password_env: Option<String>,

    #[serde(rename = "login-url", default)]
    pub login_url: Option<String>,

    #[serde(rename = "username-selector", default)]
    pub username_selector: Option<String>,

    #[serde(rename = "password-selector", default)]
    pub password_selector: Option<String>,

    #[serde(rename = "submit-selector", default)]
    pub submit_selector: Option<String>,

    /// Selector that only appears once logged in
    #[serde(rename = "success-selector", default)]
    pub success_selector: Option<String>,

    /// Treat "still on the login URL after submit" as rejected credentials
    #[serde(rename = "verify-url-change", default = "default_true")]
    pub verify_url_change: bool,

    #[serde(rename = "settle-delay-ms", default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(rename = "verify-timeout-ms", default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,

    /// How long a persisted session may be reused
    #[serde(rename = "session-ttl-secs", default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl AuthEntry {
    /// Resolves the password, reading `password-env` if no inline password is set
    pub fn resolve_password(&self) -> Option<String> {
        if let Some(password) = &self.password {
            return Some(password.clone());
        }
        self.password_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
    }
}

impl fmt::Debug for AuthEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEntry")
            .field("site", &self.site)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_env", &self.password_env)
            .field("login_url", &self.login_url)
            .field("success_selector", &self.success_selector)
            .finish_non_exhaustive()
    }
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> u32 {
    100
}

fn default_max_concurrent() -> u32 {
    5
}

fn default_memory_threshold() -> f64 {
    70.0
}

fn default_check_interval_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_retry_budget() -> u32 {
    1
}

fn default_user_agent() -> String {
    format!("ripple-crawl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_redirects() -> usize {
    10
}

fn default_wait_poll_ms() -> u64 {
    500
}

fn default_dedup_window_secs() -> u64 {
    3600
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_verify_timeout_ms() -> u64 {
    10_000
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}
