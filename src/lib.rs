//! Ripple Engine: a polite, pluggable crawl engine
//!
//! This crate schedules crawl tasks through a priority queue under a
//! concurrency cap and resource budget, and passes every task through an
//! ordered plugin pipeline that applies rate limiting, retries, delays and
//! duplicate filtering.

pub mod config;
pub mod crawler;
pub mod pipeline;
pub mod plugins;
pub mod queue;
pub mod resource;
pub mod scheduler;
pub mod state;
pub mod task;
pub mod url;

use thiserror::Error;

/// Main error type for Ripple Engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Task failed: {0}")]
    Task(#[from] TaskError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Errors raised synchronously by the task queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue is full ({size}/{max})")]
    Full { size: usize, max: usize },
}

/// Errors raised by a plugin hook
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("Duplicate URL: {url}")]
    Duplicate { url: String },

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Failed(String),
}

/// Errors raised by the plugin pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Plugin '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Plugin '{plugin}' depends on '{dependency}', which is not registered")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Plugin '{plugin}' is required by: {}", .dependents.join(", "))]
    RequiredBy {
        plugin: String,
        dependents: Vec<String>,
    },

    #[error("Plugin '{0}' is not registered")]
    NotRegistered(String),

    #[error("Plugin '{plugin}' failed in {hook}: {source}")]
    Hook {
        plugin: String,
        hook: pipeline::Hook,
        source: PluginError,
    },
}

/// Failure of a single task, as reported by an executor
///
/// Carries enough detail for retry decisions: an optional error code in the
/// style of socket errors (`ECONNRESET`, `ETIMEDOUT`, ...) and the HTTP status
/// when the failure came from a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    pub code: Option<String>,
    pub status: Option<u16>,
}

impl TaskError {
    /// A failure that carries an HTTP status code
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: Some(status),
        }
    }

    /// A transport failure identified by an error code such as `ECONNRESET`
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
            status: None,
        }
    }

    /// A request that did not finish in time
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::network("ETIMEDOUT", message)
    }

    /// Any other failure
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
        }
    }
}

impl From<PipelineError> for TaskError {
    fn from(err: PipelineError) -> Self {
        Self {
            message: err.to_string(),
            code: Some("EPLUGIN".to_string()),
            status: None,
        }
    }
}

/// Result type alias for Ripple Engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::EngineConfig;
pub use crawler::{CrawlSummary, Engine};
pub use pipeline::{Hook, Pipeline, Plugin, PluginInfo};
pub use queue::{MultiLevelQueue, PriorityQueue, TaskId, TaskQueue};
pub use resource::{ResourceLimits, ResourceMonitor};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerEvent};
pub use state::{TaskState, TaskStatus};
pub use task::{Response, Task, TaskResult};
