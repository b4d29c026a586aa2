use super::{CrawlStrategy, CrawlTask};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use url::Url;

/// A task ranked for best-first order
///
/// Higher scores pop first; among equal scores the earliest discovered
/// (lowest `seq`) pops first.
#[derive(Debug)]
struct Ranked(CrawlTask);

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

#[derive(Debug)]
enum Queue {
    Fifo(VecDeque<CrawlTask>),
    Lifo(Vec<CrawlTask>),
    Priority(BinaryHeap<Ranked>),
}

/// Pending work of one crawl run, ordered by the run's strategy
#[derive(Debug)]
pub struct Frontier {
    queue: Queue,
}

impl Frontier {
    pub fn new(strategy: CrawlStrategy) -> Self {
        let queue = match strategy {
            CrawlStrategy::Bfs => Queue::Fifo(VecDeque::new()),
            CrawlStrategy::Dfs => Queue::Lifo(Vec::new()),
            CrawlStrategy::BestFirst => Queue::Priority(BinaryHeap::new()),
        };
        Self { queue }
    }

    pub fn push(&mut self, task: CrawlTask) {
        match &mut self.queue {
            Queue::Fifo(queue) => queue.push_back(task),
            Queue::Lifo(stack) => stack.push(task),
            Queue::Priority(heap) => heap.push(Ranked(task)),
        }
    }

    pub fn pop(&mut self) -> Option<CrawlTask> {
        match &mut self.queue {
            Queue::Fifo(queue) => queue.pop_front(),
            Queue::Lifo(stack) => stack.pop(),
            Queue::Priority(heap) => heap.pop().map(|ranked| ranked.0),
        }
    }

    /// Pops up to `n` tasks in frontier order
    pub fn take(&mut self, n: usize) -> Vec<CrawlTask> {
        let mut tasks = Vec::with_capacity(n.min(self.len()));
        while tasks.len() < n {
            match self.pop() {
                Some(task) => tasks.push(task),
                None => break,
            }
        }
        tasks
    }

    pub fn len(&self) -> usize {
        match &self.queue {
            Queue::Fifo(queue) => queue.len(),
            Queue::Lifo(stack) => stack.len(),
            Queue::Priority(heap) => heap.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalized URLs already enqueued in one run
///
/// A URL is marked when it is enqueued, not when its fetch completes, so
/// two pages linking to the same URL in one batch cannot both enqueue it.
#[derive(Debug, Default)]
pub struct VisitedSet {
    urls: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a URL, returning false if it was already marked
    pub fn insert(&mut self, url: &Url) -> bool {
        self.urls.insert(url.as_str().to_string())
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.urls.contains(url.as_str())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
