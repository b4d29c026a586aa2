use crate::config::CrawlerConfig;
use crate::url::DomainAllowList;
use crate::ConfigError;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use url::Url;

/// Why a discovered link was not enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneReason {
    /// Host outside the allow-list
    OffDomain,
    /// Would exceed the maximum depth
    Depth,
    /// Rejected by an include or exclude pattern
    Pattern,
    /// Already enqueued in this run
    Duplicate,
    /// Could never be fetched within the page limit
    PageCap,
}

impl fmt::Display for PruneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OffDomain => "off_domain",
            Self::Depth => "depth",
            Self::Pattern => "pattern",
            Self::Duplicate => "duplicate",
            Self::PageCap => "page_cap",
        };
        f.write_str(s)
    }
}

/// Per-link admission rules of a crawl run
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    allowed: DomainAllowList,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    max_depth: u32,
}

impl LinkPolicy {
    pub fn new(allowed: DomainAllowList, include: Vec<Regex>, exclude: Vec<Regex>, max_depth: u32) -> Self {
        Self {
            allowed,
            include,
            exclude,
            max_depth,
        }
    }

    /// Builds the policy from the `[crawler]` section, compiling its patterns
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            DomainAllowList::new(&config.allowed_domains),
            compile(&config.include_patterns)?,
            compile(&config.exclude_patterns)?,
            config.max_depth,
        ))
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Checks a normalized link that would be enqueued at `depth`
    ///
    /// Rules apply in order: allow-list, depth, then patterns. An empty
    /// include list admits every URL.
    pub fn check(&self, url: &Url, depth: u32) -> Result<(), PruneReason> {
        if !self.allowed.allows(url) {
            return Err(PruneReason::OffDomain);
        }
        if depth > self.max_depth {
            return Err(PruneReason::Depth);
        }

        let candidate = url.as_str();
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(candidate)) {
            return Err(PruneReason::Pattern);
        }
        if self.exclude.iter().any(|re| re.is_match(candidate)) {
            return Err(PruneReason::Pattern);
        }
        Ok(())
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", p, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn policy(allowed: &[&str], include: &[&str], exclude: &[&str]) -> LinkPolicy {
        let config = CrawlerConfig {
            max_depth: 2,
            allowed_domains: allowed.iter().map(|s| s.to_string()).collect(),
            include_patterns: include.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: exclude.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        LinkPolicy::from_config(&config).unwrap()
    }

    #[test]
    fn test_allow_list_checked_first() {
        let policy = policy(&["docs.example.com"], &[], &[]);
        assert_eq!(
            policy.check(&url("https://blog.example.com/x"), 5),
            Err(PruneReason::OffDomain)
        );
        assert_eq!(policy.check(&url("https://docs.example.com/x"), 2), Ok(()));
        assert_eq!(
            policy.check(&url("https://docs.example.com/x"), 3),
            Err(PruneReason::Depth)
        );
    }

    #[test]
    fn test_patterns() {
        let policy = policy(&[], &["/docs/"], &["/docs/private"]);
        assert_eq!(policy.check(&url("https://x.com/docs/a"), 1), Ok(()));
        assert_eq!(
            policy.check(&url("https://x.com/blog/a"), 1),
            Err(PruneReason::Pattern)
        );
        assert_eq!(
            policy.check(&url("https://x.com/docs/private/a"), 1),
            Err(PruneReason::Pattern)
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let config = CrawlerConfig {
            exclude_patterns: vec!["(unclosed".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            LinkPolicy::from_config(&config),
            Err(ConfigError::InvalidPattern(_))
        ));
    }
}
