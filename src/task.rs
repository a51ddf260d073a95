//! Task descriptors, responses and results
//!
//! A [`Task`] is one crawl unit: a URL plus request options, a priority, a
//! retry budget and a free-form metadata map that plugins read and write
//! (`depth`, `retry_count`, `delay`, ...). Extraction and follow rules are
//! opaque JSON values to the scheduler; only the crawler's parser reads them.

use crate::TaskError;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Metadata key holding the crawl depth of a task
pub const META_DEPTH: &str = "depth";

/// Metadata key holding how many times a task has been retried
pub const META_RETRY_COUNT: &str = "retry_count";

/// Metadata key holding a per-task politeness delay in milliseconds
pub const META_DELAY: &str = "delay";

/// Callback invoked with the result of a single task
pub type ResultCallback = Arc<dyn Fn(&TaskResult) + Send + Sync>;

/// A crawl task descriptor
#[derive(Clone)]
pub struct Task {
    /// Target URL
    pub url: String,

    /// HTTP method
    pub method: Method,

    /// Extra request headers
    pub headers: HashMap<String, String>,

    /// Optional request body
    pub body: Option<String>,

    /// Priority (higher is more urgent)
    pub priority: i32,

    /// Retry budget for this task
    pub retries: u32,

    /// Request timeout, enforced by the fetcher
    pub timeout: Option<Duration>,

    /// Extraction rule handle
    pub extract: Option<Value>,

    /// Follow rule handle
    pub follow: Option<Value>,

    /// Free-form metadata mutated by plugins
    pub metadata: Map<String, Value>,

    /// Called once the task has produced a result
    pub on_result: Option<ResultCallback>,
}

impl Task {
    /// Creates a GET task for the given URL with default options
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HashMap::new(),
            body: None,
            priority: 0,
            retries: 3,
            timeout: None,
            extract: None,
            follow: None,
            metadata: Map::new(),
            on_result: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_extract(mut self, rule: Value) -> Self {
        self.extract = Some(rule);
        self
    }

    pub fn with_follow(mut self, rule: Value) -> Self {
        self.follow = Some(rule);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn on_result(mut self, callback: ResultCallback) -> Self {
        self.on_result = Some(callback);
        self
    }

    /// Crawl depth recorded in metadata (0 for seeds)
    pub fn depth(&self) -> u32 {
        self.meta_u64(META_DEPTH).unwrap_or(0) as u32
    }

    /// Number of retries already attempted
    pub fn retry_count(&self) -> u32 {
        self.meta_u64(META_RETRY_COUNT).unwrap_or(0) as u32
    }

    /// Reads an unsigned integer from metadata
    pub fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    /// Lowercase host of the target URL, if it parses
    pub fn domain(&self) -> Option<String> {
        crate::url::domain_of(&self.url)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("priority", &self.priority)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("metadata", &self.metadata)
            .field("has_callback", &self.on_result.is_some())
            .finish()
    }
}

/// A fetched HTTP response
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Final URL after redirects
    pub url: String,

    /// HTTP status code
    pub status: u16,

    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,

    /// Body text
    pub body: String,
}

impl Response {
    /// Looks up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether the response declares an HTML body
    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false)
    }
}

/// Outcome of one task execution
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// The task that produced this result
    pub task: Task,

    /// The response, when one was received
    pub response: Option<Response>,

    /// Extracted data
    pub parsed: Option<Value>,

    /// Follow-up tasks discovered on the page
    pub follow_ups: Vec<Task>,

    /// Failure, if any
    pub error: Option<TaskError>,

    /// Retries performed before this result
    pub retry_count: u32,

    /// Wall time spent executing
    pub duration: Duration,

    /// When the result was produced
    pub timestamp: DateTime<Utc>,
}

impl TaskResult {
    /// A successful result carrying a response
    pub fn success(task: Task, response: Response, duration: Duration) -> Self {
        let retry_count = task.retry_count();
        Self {
            task,
            response: Some(response),
            parsed: None,
            follow_ups: Vec::new(),
            error: None,
            retry_count,
            duration,
            timestamp: Utc::now(),
        }
    }

    /// A failed result
    pub fn failure(task: Task, error: TaskError, duration: Duration) -> Self {
        let retry_count = task.retry_count();
        Self {
            task,
            response: None,
            parsed: None,
            follow_ups: Vec::new(),
            error: Some(error),
            retry_count,
            duration,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
