//! Output rendering for the command-line surface
//!
//! This module turns run reports and cache entries into:
//! - JSON documents (crawl results, batch results, cache entries)
//! - Human-readable summaries printed after a run

pub mod stats;

pub use stats::{format_batch_summary, format_crawl_summary, print_batch_summary, print_crawl_summary};

use crate::batch::BatchReport;
use crate::cache::CacheEntry;
use crate::crawler::{CrawlReport, CrawlSummary};
use crate::render::{ContentFilter, FilteredContent, LinkGroups, MediaItem};
use crate::state::FetchStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// One crawled page in a crawl document
#[derive(Debug, Serialize)]
pub struct PageOutput {
    pub url: String,
    pub depth: u32,
    pub content_id: Option<String>,
    pub title: String,
    pub links_found: usize,
    pub status: FetchStatus,
}

/// JSON document describing a finished crawl
#[derive(Debug, Serialize)]
pub struct CrawlOutput<'a> {
    pub success: bool,
    pub start_url: &'a str,
    pub strategy: String,
    pub pages_crawled: usize,
    pub max_depth_reached: u32,
    pub results: Vec<PageOutput>,
    pub summary: &'a CrawlSummary,
}

impl<'a> CrawlOutput<'a> {
    pub fn new(report: &'a CrawlReport) -> Self {
        let results = report
            .pages
            .iter()
            .map(|page| PageOutput {
                url: page.task.url.clone(),
                depth: page.task.depth,
                content_id: page.cache_id.clone(),
                title: page.result.title.clone().unwrap_or_default(),
                links_found: page.links_found(),
                status: page.result.status,
            })
            .collect();

        Self {
            success: true,
            start_url: &report.summary.start_url,
            strategy: report.summary.strategy.to_string(),
            pages_crawled: report.pages.len(),
            max_depth_reached: report.summary.max_depth_reached,
            results,
            summary: &report.summary,
        }
    }
}

/// One task in a batch document
#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub url: String,
    pub success: bool,
    pub status: FetchStatus,
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// JSON document describing a finished batch
#[derive(Debug, Serialize)]
pub struct BatchOutput {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub results: Vec<BatchItem>,
}

impl BatchOutput {
    /// Builds the document from a batch report
    ///
    /// # Arguments
    ///
    /// * `report` - The finished batch
    /// * `content_ids` - Cache ids of stored results, keyed by task id
    pub fn new(report: &BatchReport, content_ids: &HashMap<u64, String>) -> Self {
        let mut outcomes: Vec<_> = report.outcomes.iter().collect();
        outcomes.sort_by_key(|outcome| outcome.task.id);

        let results = outcomes
            .into_iter()
            .map(|outcome| BatchItem {
                url: outcome.task.url.clone(),
                success: outcome.is_success(),
                status: outcome.status(),
                content_id: content_ids.get(&outcome.task.id).cloned(),
                error: outcome.error_message(),
                attempts: outcome.attempts,
                elapsed_ms: outcome.elapsed_ms,
            })
            .collect();

        Self {
            total: report.total(),
            successful: report.successful(),
            failed: report.failed(),
            cancelled: report.cancelled,
            results,
        }
    }
}

/// Which bulky fields a cache entry document carries
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub include_html: bool,
    pub include_screenshot: bool,
    /// Adds the page text this filter keeps
    pub filter: Option<ContentFilter>,
}

/// JSON document for one cache entry
#[derive(Debug, Serialize)]
pub struct EntryOutput<'a> {
    pub id: &'a str,
    pub source_url: &'a str,
    pub final_url: &'a str,
    pub created_at: DateTime<Utc>,
    pub status: FetchStatus,
    pub status_code: Option<u16>,
    pub title: Option<&'a str>,
    pub timing_ms: u64,
    pub links: LinkGroups<'a>,
    pub media: &'a [MediaItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<FilteredContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<&'a str>,
    /// Hex-encoded screenshot bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    /// Hex-encoded PDF bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
}

impl<'a> EntryOutput<'a> {
    pub fn new(entry: &'a CacheEntry, options: EntryOptions) -> Self {
        let result = &entry.result;
        let binary = |bytes: &Option<Vec<u8>>| {
            if options.include_screenshot {
                bytes.as_ref().map(hex::encode)
            } else {
                None
            }
        };

        Self {
            id: &entry.id,
            source_url: &entry.source_url,
            final_url: &result.final_url,
            created_at: entry.created_at,
            status: result.status,
            status_code: result.status_code,
            title: result.title.as_deref(),
            timing_ms: result.timing_ms,
            links: result.classify_links(),
            media: &result.media,
            content: options.filter.as_ref().map(|filter| result.filter_content(filter)),
            html: options.include_html.then_some(result.html.as_str()),
            screenshot: binary(&result.screenshot),
            pdf: binary(&result.pdf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{TaskError, TaskOutcome};
    use crate::crawler::CrawlTask;
    use crate::render::{FetchError, FetchResult};
    use url::Url;

    fn result(url: &str, code: u16) -> FetchResult {
        FetchResult::from_html(
            url,
            &Url::parse(url).unwrap(),
            code,
            "<html><head><title>Docs</title></head><body><a href=\"/a\">A</a></body></html>"
                .to_string(),
            12,
        )
    }

    #[test]
    fn test_batch_output_sorted_by_task() {
        let report = BatchReport {
            outcomes: vec![
                TaskOutcome {
                    task: CrawlTask::new(1, "https://x.com/b".into(), 0, None),
                    result: Err(TaskError::Fetch(FetchError::Timeout(100))),
                    attempts: 2,
                    elapsed_ms: 200,
                },
                TaskOutcome {
                    task: CrawlTask::new(0, "https://x.com/a".into(), 0, None),
                    result: Ok(result("https://x.com/a", 200)),
                    attempts: 1,
                    elapsed_ms: 10,
                },
            ],
            ..Default::default()
        };
        let ids = HashMap::from([(0, "abc123def456".to_string())]);
        let output = BatchOutput::new(&report, &ids);

        assert_eq!(output.total, 2);
        assert_eq!(output.successful, 1);
        assert_eq!(output.results[0].url, "https://x.com/a");
        assert_eq!(output.results[0].content_id.as_deref(), Some("abc123def456"));
        assert_eq!(output.results[1].status, FetchStatus::Timeout);
        assert_eq!(
            output.results[1].error.as_deref(),
            Some("Timed out after 100ms")
        );

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["results"][1]["status"], "timeout");
        assert!(json["results"][0].get("error").is_none());
    }

    #[test]
    fn test_entry_output_omits_bulky_fields() {
        let mut fetched = result("https://x.com/", 200);
        fetched.screenshot = Some(vec![0xde, 0xad]);
        let entry = CacheEntry {
            id: "0123456789ab".to_string(),
            source_url: "https://x.com/".to_string(),
            params_key: String::new(),
            result: fetched,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(EntryOutput::new(&entry, EntryOptions::default())).unwrap();
        assert!(json.get("html").is_none());
        assert!(json.get("screenshot").is_none());
        assert_eq!(json["title"], "Docs");
        assert_eq!(json["links"]["internal"][0]["url"], "https://x.com/a");
        assert!(json.get("content").is_none());

        let options = EntryOptions {
            include_html: true,
            include_screenshot: true,
            filter: Some(ContentFilter::Pruning { min_words: 1 }),
        };
        let json = serde_json::to_value(EntryOutput::new(&entry, options)).unwrap();
        assert!(json["html"].as_str().unwrap().contains("<title>Docs"));
        assert_eq!(json["screenshot"], "dead");
        assert_eq!(json["content"]["dropped"], 0);
    }
}
