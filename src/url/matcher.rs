/// Checks if a host matches an allow-list pattern
///
/// Two pattern forms are supported:
/// 1. Exact: `docs.example.com` matches only `docs.example.com`
/// 2. Wildcard: `*.example.com` matches `example.com` and any subdomain of it
///
/// Both sides are expected to be normalized already; the comparison itself is
/// case-sensitive.
///
/// # Examples
///
/// ```
/// use ripple_crawl::url::matches_wildcard;
///
/// assert!(matches_wildcard("docs.example.com", "docs.example.com"));
/// assert!(!matches_wildcard("docs.example.com", "example.com"));
///
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "myexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || (candidate.len() > base.len()
                    && candidate.ends_with(base)
                    && candidate.as_bytes()[candidate.len() - base.len() - 1] == b'.')
        }
        None => candidate == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_only() {
        assert!(matches_wildcard("docs.example.com", "docs.example.com"));
        assert!(!matches_wildcard("docs.example.com", "api.docs.example.com"));
        assert!(!matches_wildcard("example.com", "docs.example.com"));
    }

    #[test]
    fn test_wildcard_matches_bare_and_nested() {
        assert!(matches_wildcard("*.example.com", "example.com"));
        assert!(matches_wildcard("*.example.com", "blog.example.com"));
        assert!(matches_wildcard("*.example.com", "deep.nested.sub.example.com"));
    }

    #[test]
    fn test_wildcard_rejects_suffix_lookalikes() {
        assert!(!matches_wildcard("*.example.com", "myexample.com"));
        assert!(!matches_wildcard("*.example.com", "example.com.org"));
        assert!(!matches_wildcard("*.example.com", "example.org"));
    }

    #[test]
    fn test_empty_strings() {
        assert!(!matches_wildcard("*.example.com", ""));
        assert!(!matches_wildcard("", "example.com"));
        assert!(matches_wildcard("", ""));
    }

    #[test]
    fn test_multiple_dots_in_base() {
        assert!(matches_wildcard("*.co.uk", "example.co.uk"));
        assert!(!matches_wildcard("*.co.uk", "co.jp"));
    }
}
