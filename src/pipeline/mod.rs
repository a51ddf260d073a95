//! Plugin pipeline
//!
//! Plugins extend the crawl at fixed hook points. A plugin implements
//! [`Plugin`] and exposes whichever hook groups it cares about:
//!
//! - [`LifecycleHooks`]: `on_init`, `on_start`, `on_stop`, `on_destroy`
//! - [`TaskHooks`]: `on_task_create`, `on_task_start`, `on_task_complete`,
//!   `on_task_error`, `on_task_retry`
//! - [`RequestHooks`]: `on_request`, `on_response`
//! - [`ExtractionHooks`]: `on_parse`, `on_follow`
//!
//! The [`Pipeline`] keeps plugins ordered by descending priority and
//! dispatches each hook either as a broadcast (every enabled plugin is
//! called) or as a transform chain (each plugin may replace the value handed
//! to the next one). A hook error aborts the dispatch: it is announced as a
//! [`PipelineEvent::PluginError`] and returned to the caller.

mod dispatch;
mod plugin;

pub use dispatch::Pipeline;
pub use plugin::{ExtractionHooks, LifecycleHooks, Plugin, RequestHooks, TaskHooks};

use crate::PluginError;
use std::fmt;
use std::time::Duration;

/// Identity and ordering metadata of a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    /// Unique name within a pipeline
    pub name: String,
    pub version: String,
    /// Higher runs earlier
    pub priority: i32,
    /// Names of plugins that must be registered first
    pub dependencies: Vec<String>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            priority: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

/// The hook points of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Init,
    Start,
    Stop,
    Destroy,
    TaskCreate,
    TaskStart,
    TaskComplete,
    TaskError,
    TaskRetry,
    Request,
    Response,
    Parse,
    Follow,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "on_init",
            Self::Start => "on_start",
            Self::Stop => "on_stop",
            Self::Destroy => "on_destroy",
            Self::TaskCreate => "on_task_create",
            Self::TaskStart => "on_task_start",
            Self::TaskComplete => "on_task_complete",
            Self::TaskError => "on_task_error",
            Self::TaskRetry => "on_task_retry",
            Self::Request => "on_request",
            Self::Response => "on_response",
            Self::Parse => "on_parse",
            Self::Follow => "on_follow",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin's request to run a failed task again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDirective {
    /// How long to wait before the task is queued again
    pub delay: Duration,
    /// The attempt number the retry will be (1 for the first retry)
    pub attempt: u32,
}

/// Signals emitted by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    PluginRegistered {
        name: String,
        version: String,
    },
    PluginUnregistered {
        name: String,
    },
    PluginEnabled {
        name: String,
    },
    PluginDisabled {
        name: String,
    },
    PluginError {
        plugin: String,
        hook: Hook,
        error: PluginError,
    },
}
