//! Crawl scheduling
//!
//! This module drives multi-page traversal over the link graph:
//! - `frontier`: pending-work ordering (FIFO, LIFO, priority) and the visited set
//! - `policy`: which discovered links may be enqueued
//! - `scoring`: keyword relevance for best-first traversal
//! - `scheduler`: the traversal loop and its report

mod frontier;
mod policy;
mod scheduler;
mod scoring;

pub use frontier::{Frontier, VisitedSet};
pub use policy::{LinkPolicy, PruneReason};
pub use scheduler::{CrawlError, CrawlReport, CrawlScheduler, CrawlSummary, CrawledPage, PruneCounts};
pub use scoring::KeywordScorer;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order in which the frontier hands out tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStrategy {
    /// Breadth-first: oldest discovered page first
    #[default]
    Bfs,
    /// Depth-first: newest discovered page first
    Dfs,
    /// Highest keyword score first, earliest discovered on ties
    #[serde(alias = "best-first")]
    BestFirst,
}

impl CrawlStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bfs => "bfs",
            Self::Dfs => "dfs",
            Self::BestFirst => "best_first",
        }
    }
}

impl fmt::Display for CrawlStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of crawl work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlTask {
    /// Unique within a run or batch
    pub id: u64,
    /// Normalized absolute URL
    pub url: String,
    /// Hops from the start URL
    pub depth: u32,
    /// Page the link was discovered on
    pub parent_url: Option<String>,
    /// Best-first relevance; zero for other strategies
    pub score: f64,
    /// Discovery order, used to break score ties
    pub seq: u64,
}

impl CrawlTask {
    pub fn new(id: u64, url: String, depth: u32, parent_url: Option<String>) -> Self {
        Self {
            id,
            url,
            depth,
            parent_url,
            score: 0.0,
            seq: id,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }
}
