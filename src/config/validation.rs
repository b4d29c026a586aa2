use crate::config::types::{AuthEntry, BatchConfig, CacheConfig, Config, CrawlerConfig};
use crate::url::normalize_url;
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_batch_config(&config.batch)?;
    validate_cache_config(&config.cache)?;
    for entry in &config.auth {
        validate_auth_entry(entry)?;
    }
    Ok(())
}

/// Parses and normalizes a crawl start URL
///
/// A start URL that cannot be crawled is the one configuration error that
/// aborts a whole run, so it is reported as `ConfigError::InvalidUrl`.
pub fn validate_start_url(start_url: &str) -> Result<Url, ConfigError> {
    normalize_url(start_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", start_url, e)))
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if let Some(start_url) = &config.start_url {
        validate_start_url(start_url)?;
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1".to_string(),
        ));
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    for pattern in config
        .include_patterns
        .iter()
        .chain(config.exclude_patterns.iter())
    {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("Invalid URL pattern '{}': {}", pattern, e))
        })?;
    }

    Ok(())
}

/// Validates batch controller limits
fn validate_batch_config(config: &BatchConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent must be between 1 and 100, got {}",
            config.max_concurrent
        )));
    }

    let threshold = config.memory_threshold_percent;
    if !(threshold > 0.0 && threshold <= 100.0) {
        return Err(ConfigError::Validation(format!(
            "memory-threshold-percent must be in (0, 100], got {}",
            threshold
        )));
    }

    if config.check_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "check-interval-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if let Some(path) = &config.database_path {
        if path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database-path cannot be empty".to_string(),
            ));
        }
    }

    if config.capacity == Some(0) {
        return Err(ConfigError::Validation(
            "capacity must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates one `[[auth]]` entry
fn validate_auth_entry(entry: &AuthEntry) -> Result<(), ConfigError> {
    validate_domain_pattern(&entry.site)?;

    if entry.username.is_empty() {
        return Err(ConfigError::Validation(format!(
            "auth entry for '{}' has an empty username",
            entry.site
        )));
    }

    if entry.password.is_none() && entry.password_env.is_none() {
        return Err(ConfigError::Validation(format!(
            "auth entry for '{}' needs either password or password-env",
            entry.site
        )));
    }

    if let Some(login_url) = &entry.login_url {
        normalize_url(login_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid login-url '{}': {}", login_url, e))
        })?;
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
///
/// Single-label hosts such as `localhost` are accepted.
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}
