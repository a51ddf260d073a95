//! Task lifecycle tracking
//!
//! A task moves `Pending -> Running -> {Completed | Failed | Cancelled}`.
//! The scheduler owns every transition.

use crate::queue::TaskId;
use crate::TaskError;
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    // ===== Active States =====
    /// Waiting in the queue
    Pending,

    /// Handed to the executor
    Running,

    // ===== Terminal States =====
    /// Executor returned a result
    Completed,

    /// Executor returned an error
    Failed,

    /// Cancelled by the caller
    Cancelled,
}

impl TaskStatus {
    /// Returns true if no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the task is still queued or running
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Checks whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) | (Self::Pending, Self::Cancelled) => true,
            (Self::Running, Self::Completed)
            | (Self::Running, Self::Failed)
            | (Self::Running, Self::Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bookkeeping record for a task the scheduler has admitted
#[derive(Debug, Clone)]
pub struct TaskState {
    pub id: TaskId,
    pub url: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<TaskError>,
}

impl TaskState {
    /// Creates a pending record
    pub fn new(id: TaskId, url: impl Into<String>, priority: i32, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            url: url.into(),
            status: TaskStatus::Pending,
            priority,
            retry_count: 0,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Moves the record to `next`, stamping the matching timestamp
    ///
    /// Returns false (and leaves the record untouched) for illegal transitions,
    /// e.g. completing a task that was already cancelled.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        } else if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        true
    }

    /// Marks the task failed with the given error
    pub fn fail(&mut self, error: TaskError) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.error = Some(error);
        true
    }
}
