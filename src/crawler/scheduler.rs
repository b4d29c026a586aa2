//! Crawl traversal loop
//!
//! The scheduler owns the frontier and the visited set of one run. Each
//! cycle it takes as many tasks as the batch controller may run at once,
//! dispatches them together, then expands the links of every fetched page
//! in dispatch order so that the frontier never depends on which fetch
//! happened to finish first.

use super::{CrawlStrategy, CrawlTask, Frontier, KeywordScorer, LinkPolicy, PruneReason, VisitedSet};
use crate::batch::{BatchController, TaskError, TaskOutcome};
use crate::cache::{CacheParams, ContentCache};
use crate::config::{validate_start_url, CrawlerConfig};
use crate::render::{FetchResult, RenderConfig};
use crate::state::FetchStatus;
use crate::url::normalize_url;
use crate::ConfigError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A page the crawl fetched
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub task: CrawlTask,
    pub result: FetchResult,
    /// Content cache id, if a cache is attached
    pub cache_id: Option<String>,
}

impl CrawledPage {
    pub fn links_found(&self) -> usize {
        self.result.links.len()
    }
}

/// A task that failed or fetched a non-success status
#[derive(Debug, Clone, Serialize)]
pub struct CrawlError {
    pub url: String,
    pub depth: u32,
    pub status: FetchStatus,
    pub message: String,
}

/// Links pruned during a run, by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneCounts {
    pub off_domain: u64,
    pub depth: u64,
    pub pattern: u64,
    pub duplicate: u64,
    pub page_cap: u64,
}

impl PruneCounts {
    pub fn record(&mut self, reason: PruneReason) {
        match reason {
            PruneReason::OffDomain => self.off_domain += 1,
            PruneReason::Depth => self.depth += 1,
            PruneReason::Pattern => self.pattern += 1,
            PruneReason::Duplicate => self.duplicate += 1,
            PruneReason::PageCap => self.page_cap += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.off_domain + self.depth + self.pattern + self.duplicate + self.page_cap
    }
}

/// Traversal summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub start_url: String,
    pub strategy: CrawlStrategy,
    /// Tasks dispatched to the renderer
    pub pages_visited: usize,
    /// Dispatched tasks that fetched a page with a success status
    pub pages_succeeded: usize,
    /// Discovered links that were never enqueued
    pub pages_skipped: u64,
    pub pruned: PruneCounts,
    pub errors: Vec<CrawlError>,
    pub max_depth_reached: u32,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Everything a run produced
///
/// A cancelled or capped run is still a valid report; it simply holds
/// fewer pages.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// Fetched pages in dispatch order
    pub pages: Vec<CrawledPage>,
    pub summary: CrawlSummary,
}

/// Mutable state of one run, owned by the loop that drives it
struct Run {
    frontier: Frontier,
    visited: VisitedSet,
    next_seq: u64,
    dispatched: usize,
}

impl Run {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Drives a multi-page traversal
pub struct CrawlScheduler {
    controller: BatchController,
    cache: Option<Arc<ContentCache>>,
    render: RenderConfig,
    strategy: CrawlStrategy,
    max_pages: usize,
    policy: LinkPolicy,
    scorer: KeywordScorer,
}

impl CrawlScheduler {
    /// Creates a scheduler for the traversal described by `config`
    ///
    /// # Arguments
    ///
    /// * `controller` - Batch controller every frontier batch is dispatched through
    /// * `config` - Strategy, limits, allow-list, keywords and URL patterns
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlScheduler)` - Ready to run
    /// * `Err(ConfigError)` - An include or exclude pattern does not compile
    pub fn new(controller: BatchController, config: &CrawlerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            controller,
            cache: None,
            render: RenderConfig::default(),
            strategy: config.strategy,
            max_pages: config.max_pages as usize,
            policy: LinkPolicy::from_config(config)?,
            scorer: KeywordScorer::new(&config.keyword_focus),
        })
    }

    /// Records every fetched page in the content cache
    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_render_config(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    /// Crawls from `start_url` until the frontier empties, the page limit is
    /// reached or `cancel` fires
    ///
    /// The start URL is always fetched; the allow-list and patterns apply to
    /// discovered links only.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - Whatever the run gathered, including partial runs
    /// * `Err(ConfigError)` - The start URL is malformed or not http(s)
    pub async fn run(
        &self,
        start_url: &str,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport, ConfigError> {
        let start_key = validate_start_url(start_url)?;
        let start = fetch_target(start_url).ok_or_else(|| {
            ConfigError::InvalidUrl(format!("Invalid start URL '{}'", start_url))
        })?;
        let started = Instant::now();

        let mut run = Run {
            frontier: Frontier::new(self.strategy),
            visited: VisitedSet::new(),
            next_seq: 0,
            dispatched: 0,
        };
        let mut report = CrawlReport {
            pages: Vec::new(),
            summary: CrawlSummary {
                start_url: start.to_string(),
                strategy: self.strategy,
                pages_visited: 0,
                pages_succeeded: 0,
                pages_skipped: 0,
                pruned: PruneCounts::default(),
                errors: Vec::new(),
                max_depth_reached: 0,
                cancelled: false,
                elapsed_ms: 0,
            },
        };

        run.visited.insert(&start_key);
        let seq = run.next_seq();
        run.frontier
            .push(CrawlTask::new(seq, start.to_string(), 0, None));

        tracing::info!(
            "Starting {} crawl from {} (max depth {}, max pages {})",
            self.strategy,
            start,
            self.policy.max_depth(),
            self.max_pages
        );

        while !run.frontier.is_empty() && run.dispatched < self.max_pages {
            if cancel.is_cancelled() {
                report.summary.cancelled = true;
                break;
            }

            let allowance = self
                .controller
                .max_concurrent()
                .min(self.max_pages - run.dispatched);
            let batch = run.frontier.take(allowance);
            run.dispatched += batch.len();

            let batch_report = self.controller.run(batch, &self.render, cancel).await;
            let mut outcomes = batch_report.outcomes;
            outcomes.sort_by_key(|outcome| outcome.task.seq);

            for outcome in outcomes {
                self.record(outcome, &mut run, &mut report);
            }

            tracing::info!(
                "Progress: {} pages crawled, {} in frontier",
                run.dispatched,
                run.frontier.len()
            );

            if batch_report.cancelled {
                report.summary.cancelled = true;
                break;
            }
        }

        if !report.summary.cancelled && !run.frontier.is_empty() {
            tracing::debug!(
                "Page limit of {} reached with {} tasks left in the frontier",
                self.max_pages,
                run.frontier.len()
            );
            report.summary.pruned.page_cap += run.frontier.len() as u64;
        }

        report.summary.pages_visited = run.dispatched;
        report.summary.pages_skipped = report.summary.pruned.total();
        report.summary.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "Crawl completed: {} pages visited, {} errors, {} links pruned in {:?}",
            report.summary.pages_visited,
            report.summary.errors.len(),
            report.summary.pages_skipped,
            started.elapsed()
        );

        Ok(report)
    }

    /// Records one outcome and expands the page's links
    fn record(&self, outcome: TaskOutcome, run: &mut Run, report: &mut CrawlReport) {
        // Never admitted, so never dispatched
        if outcome.attempts == 0 {
            run.dispatched -= 1;
            return;
        }

        let task = outcome.task;
        let result = match outcome.result {
            Ok(result) => result,
            Err(e) => {
                report.summary.errors.push(CrawlError {
                    url: task.url.clone(),
                    depth: task.depth,
                    status: e.status(),
                    message: e.to_string(),
                });
                if !matches!(e, TaskError::Cancelled) {
                    tracing::warn!("Failed to crawl {}: {}", task.url, e);
                }
                return;
            }
        };

        report.summary.max_depth_reached = report.summary.max_depth_reached.max(task.depth);

        if result.is_success() {
            report.summary.pages_succeeded += 1;
            self.expand(&task, &result, run, &mut report.summary.pruned);
        } else {
            report.summary.errors.push(CrawlError {
                url: task.url.clone(),
                depth: task.depth,
                status: result.status,
                message: match result.status_code {
                    Some(code) => format!("HTTP {}", code),
                    None => result.status.to_string(),
                },
            });
        }

        let cache_id = self.cache.as_ref().and_then(|cache| {
            let params = CacheParams {
                bypass: true,
                ..CacheParams::new(task.url.clone(), self.render.clone())
            };
            match cache.put(&params, result.clone()) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!("Failed to cache {}: {}", task.url, e);
                    None
                }
            }
        });

        report.pages.push(CrawledPage {
            task,
            result,
            cache_id,
        });
    }

    /// Enqueues the links of a fetched page that pass the run's policy
    fn expand(&self, task: &CrawlTask, result: &FetchResult, run: &mut Run, pruned: &mut PruneCounts) {
        // A redirect target counts as visited too
        if let Ok(landed) = normalize_url(&result.final_url) {
            run.visited.insert(&landed);
        }

        let depth = task.depth + 1;
        let remaining = self.max_pages.saturating_sub(run.dispatched);

        for link in &result.links {
            let key = match normalize_url(&link.url) {
                Ok(key) => key,
                Err(e) => {
                    tracing::trace!("Skipping link {}: {}", link.url, e);
                    continue;
                }
            };
            let Some(url) = fetch_target(&link.url) else {
                continue;
            };

            let verdict = match self.policy.check(&url, depth) {
                Err(reason) => Err(reason),
                Ok(()) if run.visited.contains(&key) => Err(PruneReason::Duplicate),
                // FIFO order: nothing pushed now could be fetched before the limit
                Ok(()) if self.strategy == CrawlStrategy::Bfs && run.frontier.len() >= remaining => {
                    Err(PruneReason::PageCap)
                }
                Ok(()) => Ok(()),
            };

            if let Err(reason) = verdict {
                tracing::trace!("Pruned {} from {} ({})", url, task.url, reason);
                // Later sightings of a capped link count as duplicates
                if reason == PruneReason::PageCap {
                    run.visited.insert(&key);
                }
                pruned.record(reason);
                continue;
            }

            run.visited.insert(&key);
            let seq = run.next_seq();
            let score = self.scorer.score(&url, &link.text);
            run.frontier.push(
                CrawlTask::new(seq, url.to_string(), depth, Some(task.url.clone())).with_score(score),
            );
        }
    }
}

/// The URL a task fetches: the link as found, minus its fragment
///
/// Normalized URLs only key the visited set; a site may not serve the
/// normalized form (`www.` dropped, trailing slash removed).
fn fetch_target(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_fragment(None);
    Some(url)
}
