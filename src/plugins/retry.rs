//! Retry decisions with exponential backoff
//!
//! The controller classifies a task failure, computes the backoff delay and
//! answers `on_task_error` with a [`RetryDirective`]. It never re-queues the
//! task itself; the crawl engine acts on the directive.

use crate::pipeline::{Plugin, PluginInfo, RetryDirective, TaskHooks};
use crate::task::{Task, TaskResult};
use crate::{PluginError, TaskError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const RETRY_CONTROLLER: &str = "retry-controller";

/// Attempts remembered per URL
const HISTORY_LIMIT: usize = 10;

/// Upper bound of the random jitter added to each delay
const MAX_JITTER_MS: u64 = 1000;

/// Custom retry predicate: `(error, attempt) -> retry?`
pub type RetryPredicate = Arc<dyn Fn(&TaskError, u32) -> bool + Send + Sync>;

/// Retry controller settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    pub enabled: bool,

    /// Upper bound on retries of any task
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    pub base_delay: u64,

    /// Cap on any single delay, in milliseconds
    pub max_delay: u64,

    pub backoff_multiplier: f64,

    pub exponential_backoff: bool,

    /// Add up to one second of random jitter
    pub jitter: bool,

    pub retryable_status_codes: Vec<u16>,

    pub retryable_error_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay: 1000,
            max_delay: 30_000,
            backoff_multiplier: 2.0,
            exponential_backoff: true,
            jitter: true,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_error_codes: [
                "ECONNRESET",
                "ECONNREFUSED",
                "ECONNABORTED",
                "ETIMEDOUT",
                "ESOCKETTIMEDOUT",
                "ENOTFOUND",
                "EAI_AGAIN",
                "EHOSTUNREACH",
                "ENETUNREACH",
                "EPIPE",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// One recorded retry
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub error: TaskError,
    pub delay: Duration,
    pub timestamp: DateTime<Utc>,
}

pub struct RetryController {
    config: RetryConfig,
    predicate: Option<RetryPredicate>,
    history: Mutex<HashMap<String, VecDeque<RetryAttempt>>>,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: None,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the built-in classification with `predicate`
    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn lock_history(&self) -> MutexGuard<'_, HashMap<String, VecDeque<RetryAttempt>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the error is worth retrying, ignoring attempt limits
    ///
    /// Checked in order: the custom predicate, the HTTP status, the network
    /// error code, then timeout wording.
    pub fn is_retryable(&self, error: &TaskError, attempt: u32) -> bool {
        if let Some(predicate) = &self.predicate {
            return predicate(error, attempt);
        }

        if let Some(status) = status_of(error) {
            if self.config.retryable_status_codes.contains(&status) {
                return true;
            }
        }

        if let Some(code) = &error.code {
            if self
                .config
                .retryable_error_codes
                .iter()
                .any(|c| c.eq_ignore_ascii_case(code))
            {
                return true;
            }
        }

        is_timeout(error)
    }

    /// Retry limit that applies to a task
    pub fn max_retries_for(&self, task: &Task) -> u32 {
        task.retries.min(self.config.max_retries)
    }

    /// Whether the task should run again after `error`
    pub fn should_retry(&self, task: &Task, error: &TaskError) -> bool {
        let attempt = task.retry_count();
        if attempt >= self.max_retries_for(task) {
            return false;
        }
        self.is_retryable(error, attempt + 1)
    }

    /// Backoff for the given retry attempt (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay as f64;
        let mut delay_ms = if self.config.exponential_backoff {
            let exponent = attempt.saturating_sub(1).min(63) as i32;
            base * self.config.backoff_multiplier.powi(exponent)
        } else {
            base
        };

        if self.config.jitter {
            delay_ms += rand::thread_rng().gen_range(0..=MAX_JITTER_MS) as f64;
        }

        let capped = delay_ms.min(self.config.max_delay as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn record(&self, url: &str, attempt: RetryAttempt) {
        let mut history = self.lock_history();
        let entries = history.entry(url.to_string()).or_default();
        entries.push_back(attempt);
        while entries.len() > HISTORY_LIMIT {
            entries.pop_front();
        }
    }

    /// Recorded attempts for a URL, oldest first
    pub fn attempts(&self, url: &str) -> Vec<RetryAttempt> {
        self.lock_history()
            .get(url)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, url: &str) {
        self.lock_history().remove(url);
    }

    pub fn reset(&self) {
        self.lock_history().clear();
    }
}

/// HTTP status carried by the error or named in its message ("HTTP 503")
fn status_of(error: &TaskError) -> Option<u16> {
    if error.status.is_some() {
        return error.status;
    }
    let message = &error.message;
    let start = message.find("HTTP ")? + "HTTP ".len();
    let digits: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() != 3 {
        return None;
    }
    digits.parse().ok()
}

fn is_timeout(error: &TaskError) -> bool {
    if matches!(error.code.as_deref(), Some("ETIMEDOUT") | Some("ESOCKETTIMEDOUT")) {
        return true;
    }
    let message = error.message.to_ascii_lowercase();
    message.contains("timeout") || message.contains("timed out")
}

impl Plugin for RetryController {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(RETRY_CONTROLLER, env!("CARGO_PKG_VERSION")).with_priority(70)
    }

    fn task_hooks(&self) -> Option<&dyn TaskHooks> {
        Some(self)
    }
}

#[async_trait]
impl TaskHooks for RetryController {
    async fn on_task_complete(
        &self,
        result: &TaskResult,
    ) -> Result<Option<TaskResult>, PluginError> {
        if result.is_success() {
            self.clear(&result.task.url);
        }
        Ok(None)
    }

    async fn on_task_error(
        &self,
        task: &Task,
        error: &TaskError,
    ) -> Result<Option<RetryDirective>, PluginError> {
        if !self.should_retry(task, error) {
            tracing::debug!(
                url = %task.url,
                attempts = task.retry_count(),
                error = %error,
                "Not retrying"
            );
            return Ok(None);
        }

        let attempt = task.retry_count() + 1;
        let delay = self.calculate_delay(attempt);
        self.record(
            &task.url,
            RetryAttempt {
                attempt,
                error: error.clone(),
                delay,
                timestamp: Utc::now(),
            },
        );

        tracing::info!(
            url = %task.url,
            attempt,
            max = self.max_retries_for(task),
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        Ok(Some(RetryDirective { delay, attempt }))
    }
}
