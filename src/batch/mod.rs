//! Bounded-concurrency batch execution
//!
//! This module runs many fetches at once under a concurrency cap and a
//! memory-pressure admission policy:
//! - `controller`: the admission loop, retries and cancellation
//! - `memory`: memory sampling and the pressure threshold

mod controller;
mod memory;

pub use controller::BatchController;
pub use memory::{MemoryPolicy, MemoryGauge, SystemMemoryGauge};

use crate::crawler::CrawlTask;
use crate::render::{FetchError, FetchResult};
use crate::session::AuthError;
use crate::state::FetchStatus;
use thiserror::Error;

/// Failure attached to a single task
///
/// A task error never aborts the batch it belongs to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Task cancelled before it completed")]
    Cancelled,

    #[error("Task aborted: {0}")]
    Aborted(String),
}

impl TaskError {
    /// Fetch status the failed task is reported under
    pub fn status(&self) -> FetchStatus {
        match self {
            Self::Fetch(e) => e.status(),
            Self::Auth(_) => FetchStatus::Blocked,
            Self::Cancelled => FetchStatus::Timeout,
            Self::Aborted(_) => FetchStatus::ScriptError,
        }
    }
}

/// The single output produced for one input task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: CrawlTask,
    pub result: Result<FetchResult, TaskError>,
    /// Render attempts spent, zero if the task was never admitted
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl TaskOutcome {
    pub(crate) fn cancelled(task: CrawlTask) -> Self {
        Self {
            task,
            result: Err(TaskError::Cancelled),
            attempts: 0,
            elapsed_ms: 0,
        }
    }

    /// Returns true if the page was fetched with a success status
    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(result) if result.is_success())
    }

    /// Status of the fetch, whether it produced a page or not
    pub fn status(&self) -> FetchStatus {
        match &self.result {
            Ok(result) => result.status,
            Err(e) => e.status(),
        }
    }

    /// Short description of what went wrong, if anything did
    pub fn error_message(&self) -> Option<String> {
        match &self.result {
            Ok(result) if result.is_success() => None,
            Ok(result) => Some(match result.status_code {
                Some(code) => format!("HTTP {}", code),
                None => result.status.to_string(),
            }),
            Err(e) => Some(e.to_string()),
        }
    }
}

/// Result of one batch run
///
/// Holds exactly one outcome per input task, in completion order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<TaskOutcome>,
    /// Highest number of tasks in flight at once
    pub peak_in_flight: usize,
    /// Admission checks that found memory under pressure
    pub pressure_waits: u32,
    /// True if the run was cancelled or timed out before every task finished
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.successful()
    }

    /// Finds the outcome for a task by its id
    pub fn outcome(&self, task_id: u64) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.task.id == task_id)
    }
}
