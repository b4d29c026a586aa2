//! Page rendering boundary
//!
//! The crawl engine never talks to the network directly. Everything it needs
//! from a page (status, HTML, links, media, optional screenshot/PDF bytes)
//! comes through the [`RenderClient`] trait:
//! - `HttpRenderClient`: reqwest-backed renderer for static pages
//! - `parser`: HTML link, title, media and form extraction
//! - `relevance`: BM25 and word-count filtering of page text

mod http;
pub mod parser;
pub mod relevance;
#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpRenderClient;
pub use parser::{parse_html, ExtractedLink, MediaItem, MediaKind, ParsedPage};
pub use relevance::{ContentFilter, FilteredContent, TextBlock};

use crate::state::FetchStatus;
use crate::url::extract_domain;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Renders pages on behalf of the crawl engine
///
/// Implementations return `Ok` whenever the site answered, even with an
/// error status; the status is carried in [`FetchResult::status`]. `Err` is
/// reserved for fetches that produced no usable page at all.
#[async_trait]
pub trait RenderClient: Send + Sync {
    /// Navigates to `url` and renders it under `config`
    async fn render(&self, url: &str, config: &RenderConfig) -> Result<FetchResult, FetchError>;

    /// Fills and submits a form, returning the page the submission lands on
    async fn submit_form(
        &self,
        form: &FormSubmission,
        config: &RenderConfig,
    ) -> Result<FetchResult, FetchError>;
}

/// Condition a render waits for before the page counts as loaded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    /// A CSS selector that must be present
    Selector(String),
    /// A fixed delay after load
    DelayMs(u64),
}

/// Infinite-scroll settings for dynamic pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScrollConfig {
    pub max_scrolls: u32,
    pub delay_ms: u64,
}

/// Per-request rendering options
///
/// Maps are ordered so that two equal configs always serialize identically;
/// the content cache relies on this for deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<WaitCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll: Option<ScrollConfig>,
    #[serde(default)]
    pub screenshot: bool,
    #[serde(default)]
    pub pdf: bool,
    /// Cookies sent with every request, typically a session's
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RenderConfig {
    /// Returns a copy carrying the given session cookies in addition to its own
    pub fn with_cookies(&self, cookies: &BTreeMap<String, String>) -> Self {
        let mut config = self.clone();
        config
            .cookies
            .extend(cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
        config
    }
}

/// HTTP method of a form submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormMethod {
    Get,
    Post,
}

/// A filled-in form ready to submit
#[derive(Clone, PartialEq, Eq)]
pub struct FormSubmission {
    /// Absolute URL the form submits to
    pub action: String,
    pub method: FormMethod,
    /// Field name/value pairs in document order
    pub fields: Vec<(String, String)>,
    /// Page the form was found on
    pub referer: String,
}

impl std::fmt::Debug for FormSubmission {
    // Field values may hold credentials
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("FormSubmission")
            .field("action", &self.action)
            .field("method", &self.method)
            .field("fields", &names)
            .field("referer", &self.referer)
            .finish()
    }
}

/// Outcome of one page fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// URL that was requested
    pub url: String,
    /// URL the page ended up on after redirects
    pub final_url: String,
    pub status: FetchStatus,
    pub status_code: Option<u16>,
    pub html: String,
    pub title: Option<String>,
    /// Absolute links in document order
    pub links: Vec<ExtractedLink>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<Vec<u8>>,
    pub timing_ms: u64,
    /// Unexpired cookies that apply to `final_url` once the page was served,
    /// including those sent with the request
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

impl FetchResult {
    /// Builds a result from an HTML page, extracting title, links and media
    pub fn from_html(
        url: &str,
        final_url: &url::Url,
        status_code: u16,
        html: String,
        timing_ms: u64,
    ) -> Self {
        let parsed = parse_html(&html, final_url);
        Self {
            url: url.to_string(),
            final_url: final_url.to_string(),
            status: FetchStatus::from_status_code(status_code),
            status_code: Some(status_code),
            html,
            title: parsed.title,
            links: parsed.links,
            media: parsed.media,
            screenshot: None,
            pdf: None,
            timing_ms,
            cookies: BTreeMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Absolute link URLs in document order
    pub fn link_urls(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|link| link.url.as_str())
    }

    /// Splits the page's links into internal and external ones
    ///
    /// A link is internal when its host equals the final URL's host, or one
    /// is a subdomain of the other, ignoring a leading `www.`.
    pub fn classify_links(&self) -> LinkGroups<'_> {
        let page_host = url::Url::parse(&self.final_url)
            .ok()
            .as_ref()
            .and_then(extract_domain);

        let mut groups = LinkGroups::default();
        for link in &self.links {
            let link_host = url::Url::parse(&link.url).ok().as_ref().and_then(extract_domain);
            let internal = match (&page_host, &link_host) {
                (Some(page), Some(host)) => same_site(page, host),
                _ => false,
            };
            if internal {
                groups.internal.push(link);
            } else {
                groups.external.push(link);
            }
        }
        groups
    }

    /// Filters the page's text blocks
    pub fn filter_content(&self, filter: &ContentFilter) -> FilteredContent {
        filter.apply(&self.html)
    }
}

/// A page's links split by site, each in document order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkGroups<'a> {
    pub internal: Vec<&'a ExtractedLink>,
    pub external: Vec<&'a ExtractedLink>,
}

fn same_site(a: &str, b: &str) -> bool {
    a == b || a.ends_with(&format!(".{}", b)) || b.ends_with(&format!(".{}", a))
}

/// Typed render failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Blocked by site: {0}")]
    Blocked(String),
}

impl FetchError {
    /// Returns true if the batch controller may spend retry budget on this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Fetch status a failed fetch is reported under
    pub fn status(&self) -> FetchStatus {
        match self {
            Self::Network(_) => FetchStatus::HttpError,
            Self::Timeout(_) => FetchStatus::Timeout,
            Self::Script(_) => FetchStatus::ScriptError,
            Self::Blocked(_) => FetchStatus::Blocked,
        }
    }
}
