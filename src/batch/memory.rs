//! Memory-pressure admission policy

use crate::config::BatchConfig;
use std::sync::Arc;
use std::time::Duration;

/// Samples how much system memory is in use
pub trait MemoryGauge: Send + Sync {
    /// Percentage of memory in use, or None if it cannot be determined
    fn used_percent(&self) -> Option<f64>;
}

/// Reads `/proc/meminfo`; reports nothing on systems without it
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemoryGauge;

impl MemoryGauge for SystemMemoryGauge {
    fn used_percent(&self) -> Option<f64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&meminfo)
    }
}

/// Computes used memory from `MemTotal` and `MemAvailable` (values in kB)
fn parse_meminfo(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|value| value.parse::<f64>().ok())
    };

    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
}

/// Decides whether the batch controller may admit another task
///
/// Above the threshold no new task is admitted; in-flight tasks are never
/// touched. If nothing is in flight and pressure has lasted `max_backoff`,
/// one task is admitted anyway so a batch cannot stall forever.
#[derive(Clone)]
pub struct MemoryPolicy {
    pub threshold_percent: f64,
    pub check_interval: Duration,
    pub max_backoff: Duration,
    gauge: Option<Arc<dyn MemoryGauge>>,
}

impl MemoryPolicy {
    pub fn new(
        threshold_percent: f64,
        check_interval: Duration,
        max_backoff: Duration,
        gauge: Arc<dyn MemoryGauge>,
    ) -> Self {
        Self {
            threshold_percent,
            check_interval,
            max_backoff,
            gauge: Some(gauge),
        }
    }

    /// Policy from the `[batch]` section, sampling system memory
    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            config.memory_threshold_percent,
            Duration::from_millis(config.check_interval_ms),
            Duration::from_millis(config.max_backoff_ms),
            Arc::new(SystemMemoryGauge),
        )
    }

    /// A policy that never reports pressure
    pub fn disabled() -> Self {
        Self {
            threshold_percent: 100.0,
            check_interval: Duration::from_millis(100),
            max_backoff: Duration::ZERO,
            gauge: None,
        }
    }

    /// Returns true if memory use is above the threshold
    pub fn under_pressure(&self) -> bool {
        match self.gauge.as_ref().and_then(|gauge| gauge.used_percent()) {
            Some(used) => used > self.threshold_percent,
            None => false,
        }
    }
}

impl std::fmt::Debug for MemoryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPolicy")
            .field("threshold_percent", &self.threshold_percent)
            .field("check_interval", &self.check_interval)
            .field("max_backoff", &self.max_backoff)
            .field("enabled", &self.gauge.is_some())
            .finish()
    }
}
