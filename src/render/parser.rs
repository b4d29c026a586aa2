//! HTML parser for extracting links and metadata
//!
//! This module handles parsing rendered HTML to extract:
//! - Links to follow (from `<a>` tags and canonical links), with anchor text
//! - Page title
//! - Media sources (`img`, `video`, `audio`)

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// A link found on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLink {
    /// Absolute URL
    pub url: String,
    /// Visible anchor text, whitespace-collapsed
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

/// A media element found on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    /// Absolute source URL
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Links found on the page, first occurrence of each URL only
    pub links: Vec<ExtractedLink>,

    pub media: Vec<MediaItem>,
}

/// Parses HTML content and extracts links and metadata
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
///
/// `rel="nofollow"` links are followed.
///
/// # Example
///
/// ```
/// use ripple_crawl::render::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links[0].url, "https://example.com/page");
/// assert_eq!(parsed.links[0].text, "Link");
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
        media: extract_media(&document, base_url),
    }
}

/// Returns true if `html` contains at least one element matching `selector`
///
/// An unparseable selector matches nothing.
pub fn contains_selector(html: &str, selector: &str) -> bool {
    let Ok(selector) = Selector::parse(selector) else {
        return false;
    };
    Html::parse_document(html).select(&selector).next().is_some()
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extracts all valid links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<ExtractedLink> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, base_url)) {
                if seen.insert(url.clone()) {
                    links.push(ExtractedLink {
                        url,
                        text: element_text(&element),
                    });
                }
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, base_url)) {
                if seen.insert(url.clone()) {
                    links.push(ExtractedLink {
                        url,
                        text: String::new(),
                    });
                }
            }
        }
    }

    links
}

fn extract_media(document: &Html, base_url: &Url) -> Vec<MediaItem> {
    let mut media = Vec::new();

    let sources = [
        ("img[src]", MediaKind::Image),
        ("video[src], video source[src]", MediaKind::Video),
        ("audio[src], audio source[src]", MediaKind::Audio),
    ];

    for (selector, kind) in sources {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(src) = element.value().attr("src").map(str::trim) else {
                continue;
            };
            if src.is_empty() || src.starts_with("data:") {
                continue;
            }
            if let Ok(absolute) = base_url.join(src) {
                media.push(MediaItem {
                    kind,
                    src: absolute.to_string(),
                    alt: element
                        .value()
                        .attr("alt")
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty()),
                });
            }
        }
    }

    media
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
        || lowered.starts_with("data:")
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
        Some(absolute_url.to_string())
    } else {
        None
    }
}
