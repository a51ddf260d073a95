//! Task scheduler
//!
//! The scheduler owns the task queue and drives admission from a single
//! polling loop. Each tick admits at most one task, and only when both the
//! concurrency cap and the resource monitor allow it. Admitted tasks are
//! handed to the configured [`TaskExecutor`] on their own Tokio task; the
//! outcome updates the scheduler's bookkeeping and is broadcast as a
//! [`SchedulerEvent`].
//!
//! Cancellation only affects bookkeeping: a cancelled task stops counting
//! as running, but an executor that is already working on it is not
//! interrupted, and its eventual outcome is discarded.

mod executor;
mod runtime;

pub use executor::TaskExecutor;
pub use runtime::Scheduler;

use crate::queue::TaskId;
use crate::resource::{
    AvailableCapacity, MemoryPressure, ResourceLimits, ResourceUsage, Utilization,
};
use crate::state::TaskState;
use crate::task::TaskResult;
use crate::TaskError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once
    pub concurrency: usize,

    /// Maximum number of queued tasks
    pub max_queue_size: usize,

    /// Number of priority tiers; more than one selects the multi-level queue
    pub priority_levels: usize,

    /// Admission tick in milliseconds
    pub poll_interval: u64,

    /// Limits handed to the resource monitor
    pub resource_limits: ResourceLimits,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_queue_size: 1000,
            priority_levels: 5,
            poll_interval: 10,
            resource_limits: ResourceLimits::default(),
        }
    }
}

/// Run state of the polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerStatus {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
        };
        write!(f, "{}", name)
    }
}

/// Signals emitted by the scheduler
///
/// The three "blocked" signals (`QueueEmpty`, `ConcurrencyLimit`,
/// `ResourceLimit`) fire when the loop first hits that condition, not on
/// every tick it persists.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    TaskQueued {
        id: TaskId,
        url: String,
        priority: i32,
    },
    TaskStarted {
        id: TaskId,
        url: String,
    },
    TaskCompleted {
        id: TaskId,
        result: Arc<TaskResult>,
    },
    TaskFailed {
        id: TaskId,
        url: String,
        error: TaskError,
    },
    TaskCancelled {
        id: TaskId,
    },
    QueueEmpty,
    QueueFull {
        size: usize,
        max: usize,
    },
    ConcurrencyLimit {
        running: usize,
        limit: usize,
    },
    ResourceLimit {
        usage: ResourceUsage,
    },
}

/// Queue occupancy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub max_size: usize,
    pub priority_levels: usize,
    /// Priority of the next task to be admitted
    pub next_priority: Option<i32>,
}

/// In-flight tasks
#[derive(Debug, Clone, Serialize)]
pub struct RunningStats {
    pub count: usize,
    pub concurrency: usize,
    #[serde(skip)]
    pub tasks: Vec<TaskState>,
}

/// Resource view as seen by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStats {
    pub usage: ResourceUsage,
    pub utilization: Utilization,
    pub available: AvailableCapacity,
    pub memory_pressure: MemoryPressure,
    pub within_limits: bool,
}

/// Aggregate scheduler statistics
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub status: SchedulerStatus,
    pub queue: QueueStats,
    pub running: RunningStats,
    pub resources: ResourceStats,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.priority_levels, 5);
        assert_eq!(config.poll_interval, 10);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            concurrency = 2
            priority-levels = 1

            [resource-limits]
            max-active-connections = 8
        "#;
        let config: SchedulerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.priority_levels, 1);
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.resource_limits.max_active_connections, 8);
    }
}
