use url::Url;

/// Lowercases a host and drops a leading `www.`
///
/// Both the visited-set keys and the allow-list patterns go through this so
/// that host comparisons agree.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Extracts the normalized host from a URL
///
/// Returns None for URLs without a host (`data:`, `mailto:` and friends).
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_crawl::url::extract_domain;
///
/// let url = Url::parse("https://WWW.Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("mailto:someone@example.com").unwrap();
/// assert_eq!(extract_domain(&url), None);
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(normalize_host)
}
