use super::{BatchReport, MemoryPolicy, TaskError, TaskOutcome};
use crate::config::BatchConfig;
use crate::crawler::CrawlTask;
use crate::render::{FetchError, FetchResult, RenderClient, RenderConfig};
use crate::session::SessionManager;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Base delay before the first retry; doubles on every further attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Runs fetches concurrently under a concurrency cap and a memory policy
///
/// Tasks are admitted in the order given. Every input task produces exactly
/// one [`TaskOutcome`], whether it succeeded, failed, or was never admitted
/// because the run was cancelled.
#[derive(Clone)]
pub struct BatchController {
    client: Arc<dyn RenderClient>,
    sessions: Option<Arc<SessionManager>>,
    max_concurrent: usize,
    retry_budget: u32,
    batch_timeout: Option<Duration>,
    memory: MemoryPolicy,
}

impl BatchController {
    /// Creates a controller from the `[batch]` configuration
    ///
    /// # Arguments
    ///
    /// * `client` - Renderer every fetch goes through
    /// * `config` - Concurrency cap, retry budget, timeouts and memory policy
    pub fn new(client: Arc<dyn RenderClient>, config: &BatchConfig) -> Self {
        Self {
            client,
            sessions: None,
            max_concurrent: config.max_concurrent.max(1) as usize,
            retry_budget: config.retry_budget,
            batch_timeout: (config.batch_timeout_ms > 0)
                .then(|| Duration::from_millis(config.batch_timeout_ms)),
            memory: MemoryPolicy::from_config(config),
        }
    }

    /// Routes fetches for configured auth sites through a session manager
    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_memory_policy(mut self, memory: MemoryPolicy) -> Self {
        self.memory = memory;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Runs every task and collects one outcome per task
    ///
    /// Admission stops when `cancel` fires or the batch timeout elapses;
    /// in-flight fetches are asked to stop and report `Cancelled`, and tasks
    /// never admitted are reported as `Cancelled` too.
    ///
    /// # Arguments
    ///
    /// * `tasks` - Tasks in admission order
    /// * `render` - Render options applied to every fetch
    /// * `cancel` - Run-level cancellation signal
    ///
    /// # Returns
    ///
    /// A report whose outcomes are in completion order
    pub async fn run(
        &self,
        tasks: Vec<CrawlTask>,
        render: &RenderConfig,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let started = Instant::now();
        let total = tasks.len();
        let token = cancel.child_token();
        let _stop_timer = token.clone().drop_guard();

        if let Some(limit) = self.batch_timeout {
            let timer = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!("Batch timeout of {:?} reached, cancelling", limit);
                        timer.cancel();
                    }
                    _ = timer.cancelled() => {}
                }
            });
        }

        tracing::debug!(
            "Starting batch of {} tasks (max {} concurrent)",
            total,
            self.max_concurrent
        );

        let render = Arc::new(render.clone());
        let mut pending: VecDeque<CrawlTask> = tasks.into();
        let mut admitted: HashMap<u64, CrawlTask> = HashMap::new();
        let mut in_flight: JoinSet<TaskOutcome> = JoinSet::new();
        let mut report = BatchReport {
            outcomes: Vec::with_capacity(total),
            ..Default::default()
        };
        let mut pressure_since: Option<Instant> = None;

        loop {
            let mut blocked_by_pressure = false;

            while in_flight.len() < self.max_concurrent && !token.is_cancelled() {
                let Some(task) = pending.front() else {
                    break;
                };

                if self.memory.under_pressure() {
                    let since = *pressure_since.get_or_insert_with(Instant::now);
                    if !(in_flight.is_empty() && since.elapsed() >= self.memory.max_backoff) {
                        blocked_by_pressure = true;
                        break;
                    }
                    tracing::warn!(
                        "Memory above {}% for {:?} with nothing in flight, admitting {}",
                        self.memory.threshold_percent,
                        since.elapsed(),
                        task.url
                    );
                }
                pressure_since = None;

                let Some(task) = pending.pop_front() else {
                    break;
                };
                admitted.insert(task.id, task.clone());
                in_flight.spawn(self.execute(task, Arc::clone(&render), token.clone()));
                report.peak_in_flight = report.peak_in_flight.max(in_flight.len());
            }

            if blocked_by_pressure {
                report.pressure_waits += 1;
                tracing::debug!(
                    "Memory above {}%, delaying admission ({} in flight, {} queued)",
                    self.memory.threshold_percent,
                    in_flight.len(),
                    pending.len()
                );
            }

            if in_flight.is_empty() {
                if pending.is_empty() || token.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.memory.check_interval) => {}
                    _ = token.cancelled() => {}
                }
                continue;
            }

            let joined = if blocked_by_pressure {
                tokio::select! {
                    joined = in_flight.join_next() => joined,
                    _ = tokio::time::sleep(self.memory.check_interval) => continue,
                }
            } else {
                in_flight.join_next().await
            };

            match joined {
                Some(Ok(outcome)) => {
                    admitted.remove(&outcome.task.id);
                    if let Some(message) = outcome.error_message() {
                        tracing::warn!("Task {} failed: {}", outcome.task.url, message);
                    }
                    report.outcomes.push(outcome);
                }
                Some(Err(e)) => tracing::error!("Render task aborted: {}", e),
                None => {}
            }
        }

        // Tasks whose future panicked never reported back
        for (_, task) in admitted.drain() {
            report.outcomes.push(TaskOutcome {
                task,
                result: Err(TaskError::Aborted("render task panicked".to_string())),
                attempts: 1,
                elapsed_ms: 0,
            });
        }

        report.cancelled = !pending.is_empty()
            || report
                .outcomes
                .iter()
                .any(|o| matches!(o.result, Err(TaskError::Cancelled)));
        report
            .outcomes
            .extend(pending.into_iter().map(TaskOutcome::cancelled));
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            "Batch finished: {}/{} successful in {}ms",
            report.successful(),
            total,
            report.elapsed_ms
        );
        report
    }

    /// Builds the future for one admitted task
    fn execute(
        &self,
        task: CrawlTask,
        render: Arc<RenderConfig>,
        token: CancellationToken,
    ) -> impl std::future::Future<Output = TaskOutcome> + Send + 'static {
        let client = Arc::clone(&self.client);
        let sessions = self.sessions.clone();
        let retry_budget = self.retry_budget;
        let max_backoff = self.memory.max_backoff.max(RETRY_BASE_DELAY);

        async move {
            let started = Instant::now();
            let mut attempts = 0u32;

            let result = loop {
                attempts += 1;
                let attempt =
                    fetch_once(client.as_ref(), sessions.as_deref(), &task.url, &render);
                let result = tokio::select! {
                    result = attempt => result,
                    _ = token.cancelled() => break Err(TaskError::Cancelled),
                };

                match &result {
                    Err(TaskError::Fetch(e)) if e.is_retryable() && attempts <= retry_budget => {
                        let delay = (RETRY_BASE_DELAY * 2u32.saturating_pow(attempts - 1))
                            .min(max_backoff);
                        tracing::debug!(
                            "Retrying {} after {} (attempt {} of {})",
                            task.url,
                            e,
                            attempts + 1,
                            retry_budget + 1
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = token.cancelled() => break Err(TaskError::Cancelled),
                        }
                    }
                    _ => break result,
                }
            };

            TaskOutcome {
                task,
                result,
                attempts,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        }
    }
}

/// One render attempt, bounded by the per-request timeout if one is set
async fn fetch_once(
    client: &dyn RenderClient,
    sessions: Option<&SessionManager>,
    url: &str,
    render: &RenderConfig,
) -> Result<FetchResult, TaskError> {
    let attempt = async {
        match sessions {
            Some(sessions) => sessions.fetch(url, render).await,
            None => client.render(url, render).await.map_err(TaskError::Fetch),
        }
    };

    match render.timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), attempt)
            .await
            .unwrap_or(Err(TaskError::Fetch(FetchError::Timeout(ms)))),
        None => attempt.await,
    }
}

impl std::fmt::Debug for BatchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchController")
            .field("max_concurrent", &self.max_concurrent)
            .field("retry_budget", &self.retry_budget)
            .field("batch_timeout", &self.batch_timeout)
            .field("memory", &self.memory)
            .field("sessions", &self.sessions.is_some())
            .finish()
    }
}
