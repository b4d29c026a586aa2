//! URL handling module for Ripple-Crawl
//!
//! This module provides URL normalization, host extraction and the
//! allow-list matching used when pruning discovered links.

mod domain;
mod matcher;
mod normalize;

pub use domain::{extract_domain, normalize_host};
pub use matcher::matches_wildcard;
pub use normalize::normalize_url;

use url::Url;

/// Host allow-list applied to discovered links
///
/// An empty list allows every host. Patterns are either exact hosts
/// (`docs.example.com`) or wildcards (`*.example.com`), and are normalized the
/// same way URL hosts are so that `WWW.Example.com` and `example.com` agree.
#[derive(Debug, Clone, Default)]
pub struct DomainAllowList {
    patterns: Vec<String>,
}

impl DomainAllowList {
    /// Builds an allow-list from configured patterns
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref().trim();
                match p.strip_prefix("*.") {
                    Some(base) => format!("*.{}", normalize_host(base)),
                    None => normalize_host(p),
                }
            })
            .filter(|p| !p.is_empty())
            .collect();

        Self { patterns }
    }

    /// Returns true if no restriction is configured
    pub fn is_unrestricted(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Checks a host against the allow-list
    pub fn allows_host(&self, host: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let host = normalize_host(host);
        self.patterns.iter().any(|p| matches_wildcard(p, &host))
    }

    /// Checks a URL's host against the allow-list
    ///
    /// URLs without a host are never allowed when a restriction is set.
    pub fn allows(&self, url: &Url) -> bool {
        match extract_domain(url) {
            Some(host) => self.allows_host(&host),
            None => self.patterns.is_empty(),
        }
    }

    /// The normalized patterns
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
