//! Crawl engine - wires the scheduler, the plugin pipeline and the fetcher
//!
//! The engine installs itself as the scheduler's executor. Every admitted
//! task goes through:
//!
//! 1. `on_task_start`, then the `on_request` chain
//! 2. the fetch, then the `on_response` chain
//! 3. status check (4xx/5xx become HTTP task errors)
//! 4. `on_parse` and `on_follow` for HTML pages
//! 5. `on_task_complete`, follow-up submission, the task's result callback
//!
//! A failure is broadcast through `on_task_error`. If a plugin answers with a
//! retry directive, the engine waits out its delay, broadcasts
//! `on_task_retry` and queues the task again; otherwise the failure is final.

use super::fetcher::{HttpFetcher, PageFetcher};
use super::parser::parse_page;
use crate::config::EngineConfig;
use crate::pipeline::{Pipeline, Plugin, RetryDirective};
use crate::plugins::{DelayController, DuplicateFilter, RateLimiter, RetryController};
use crate::queue::TaskId;
use crate::resource::ResourceMonitor;
use crate::scheduler::{Scheduler, TaskExecutor};
use crate::task::{Task, TaskResult, META_RETRY_COUNT};
use crate::{EngineError, PipelineError, PluginError, TaskError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// Tasks that completed successfully
    pub succeeded: u64,

    /// Tasks that failed with no retry left
    pub failed: u64,

    /// Retries queued
    pub retried: u64,

    /// Tasks rejected by `on_task_create`, duplicates included
    pub rejected: u64,

    /// Follow-up tasks queued from crawled pages
    pub discovered: u64,

    /// Wall time of the run
    #[serde(skip)]
    pub elapsed: Duration,
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Succeeded:  {}", self.succeeded)?;
        writeln!(f, "Failed:     {}", self.failed)?;
        writeln!(f, "Retried:    {}", self.retried)?;
        writeln!(f, "Rejected:   {}", self.rejected)?;
        writeln!(f, "Discovered: {}", self.discovered)?;
        write!(f, "Elapsed:    {:.2}s", self.elapsed.as_secs_f64())
    }
}

struct EngineInner {
    config: EngineConfig,
    scheduler: Scheduler,
    pipeline: Pipeline,
    fetcher: Arc<dyn PageFetcher>,
    duplicates: Option<Arc<DuplicateFilter>>,
    summary: Mutex<CrawlSummary>,
    pending_retries: AtomicUsize,
    retry_settled: Notify,
    initialized: AtomicBool,
}

impl EngineInner {
    fn lock_summary(&self) -> MutexGuard<'_, CrawlSummary> {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Crawl engine
///
/// Cloning yields another handle to the same engine.
///
/// # Example
///
/// ```no_run
/// use ripple_engine::{Engine, EngineConfig};
///
/// # async fn example() -> ripple_engine::Result<()> {
/// let engine = Engine::new(EngineConfig::default())?;
/// engine.add_url("https://example.com/").await?;
/// let summary = engine.run().await?;
/// println!("{}", summary);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine that fetches over HTTP
    ///
    /// # Returns
    ///
    /// * `Ok(Engine)` - Engine with the policy plugins enabled in `config`
    /// * `Err(EngineError)` - The HTTP client could not be built
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let fetcher = HttpFetcher::new(&config.fetch, &config.user_agent)?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Creates an engine around a custom fetcher
    pub fn with_fetcher(
        config: EngineConfig,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Result<Self, EngineError> {
        let monitor = ResourceMonitor::new(config.scheduler.resource_limits.clone());
        Self::with_monitor(config, fetcher, monitor)
    }

    /// Creates an engine whose scheduler is gated by `monitor`
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration; its resource limits are ignored in
    ///   favour of the monitor's
    /// * `fetcher` - Page fetcher
    /// * `monitor` - Resource monitor for the scheduler's admission gate
    pub fn with_monitor(
        config: EngineConfig,
        fetcher: Arc<dyn PageFetcher>,
        monitor: ResourceMonitor,
    ) -> Result<Self, EngineError> {
        let duplicates = config
            .duplicate_filter
            .enabled
            .then(|| Arc::new(DuplicateFilter::new(config.duplicate_filter.clone())));

        let pipeline = Pipeline::new();
        for plugin in builtin_plugins(&config, duplicates.clone()) {
            pipeline.register(plugin)?;
        }

        let scheduler = Scheduler::with_resource_monitor(config.scheduler.clone(), monitor);

        let inner = Arc::new(EngineInner {
            config,
            scheduler,
            pipeline,
            fetcher,
            duplicates,
            summary: Mutex::new(CrawlSummary::default()),
            pending_retries: AtomicUsize::new(0),
            retry_settled: Notify::new(),
            initialized: AtomicBool::new(false),
        });

        inner.scheduler.set_executor(CrawlExecutor {
            engine: Arc::downgrade(&inner),
        });

        Ok(Self { inner })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Registers an additional plugin
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), PipelineError> {
        self.inner.pipeline.register(plugin)
    }

    /// Submits a task
    ///
    /// The task passes the `on_task_create` chain first; a plugin may rewrite
    /// or reject it (the duplicate filter rejects URLs already seen). If the
    /// queue is full the URL's fingerprint is dropped again, so the task can
    /// be resubmitted later.
    pub async fn add_task(&self, task: Task) -> Result<TaskId, EngineError> {
        let task = match self.inner.pipeline.on_task_create(task).await {
            Ok(task) => task,
            Err(e) => {
                self.inner.lock_summary().rejected += 1;
                return Err(e.into());
            }
        };
        let url = task.url.clone();
        match self.inner.scheduler.enqueue(task) {
            Ok(id) => Ok(id),
            Err(e) => {
                if let Some(duplicates) = &self.inner.duplicates {
                    duplicates.forget(&url);
                }
                tracing::debug!(url = %url, "Task not queued: {}", e);
                Err(e.into())
            }
        }
    }

    /// Submits a default GET task for `url`
    pub async fn add_url(&self, url: &str) -> Result<TaskId, EngineError> {
        self.add_task(Task::new(url)).await
    }

    /// Submits the seeds listed in the configuration
    ///
    /// Seeds rejected by a plugin are skipped with a warning.
    ///
    /// # Returns
    ///
    /// The number of seeds queued
    pub async fn add_seeds(&self) -> Result<usize, EngineError> {
        let mut queued = 0;
        for seed in &self.inner.config.seeds {
            match self.add_task(seed.to_task()).await {
                Ok(_) => queued += 1,
                Err(EngineError::Pipeline(e)) => {
                    tracing::warn!(url = %seed.url, "Seed rejected: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(queued)
    }

    /// Runs until no task is queued, running or waiting for a retry
    pub async fn run(&self) -> Result<CrawlSummary, EngineError> {
        let started = Instant::now();

        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            self.inner.pipeline.initialize().await?;
        }
        self.inner.pipeline.start().await?;
        self.inner.scheduler.start();
        tracing::info!(
            plugins = self.inner.pipeline.len(),
            queued = self.inner.scheduler.queue_stats().size,
            "Crawl started"
        );

        self.wait_until_settled().await;

        self.inner.scheduler.stop();
        self.inner.pipeline.stop().await?;

        let summary = self.summary_with_elapsed(started.elapsed());
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            retried = summary.retried,
            "Crawl finished in {:.2}s",
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    /// Tears the plugins down; the engine should not be run afterwards
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.inner.scheduler.stop();
        self.inner.pipeline.destroy().await?;
        Ok(())
    }

    /// Counters so far
    pub fn summary(&self) -> CrawlSummary {
        self.inner.lock_summary().clone()
    }

    fn summary_with_elapsed(&self, elapsed: Duration) -> CrawlSummary {
        let mut summary = self.summary();
        summary.elapsed = elapsed;
        summary
    }

    async fn wait_until_settled(&self) {
        loop {
            self.inner.scheduler.wait_until_idle().await;

            let settled = self.inner.retry_settled.notified();
            if self.inner.pending_retries.load(Ordering::SeqCst) == 0 {
                if self.inner.scheduler.is_idle() {
                    return;
                }
                continue;
            }
            settled.await;
        }
    }

    /// Runs one attempt of a task and settles its outcome
    async fn process(&self, task: Task) -> Result<TaskResult, TaskError> {
        let started = Instant::now();
        match self.attempt(task.clone(), started).await {
            Ok(result) => {
                self.inner.lock_summary().succeeded += 1;
                self.submit_follow_ups(&result).await;
                if let Some(callback) = &result.task.on_result {
                    callback(&result);
                }
                Ok(result)
            }
            Err(error) => {
                self.handle_failure(task, &error, started.elapsed()).await;
                Err(error)
            }
        }
    }

    async fn attempt(&self, task: Task, started: Instant) -> Result<TaskResult, TaskError> {
        let pipeline = &self.inner.pipeline;

        pipeline.on_task_start(&task).await?;
        let task = pipeline.on_request(task).await?;

        let response = self.inner.fetcher.fetch(&task).await?;
        let response = pipeline.on_response(&task, response).await?;

        if response.status >= 400 {
            return Err(TaskError::http(
                response.status,
                format!("HTTP {} from {}", response.status, response.url),
            ));
        }

        let mut parsed = None;
        let mut follow_ups = Vec::new();
        if response.is_html() || response.header("content-type").is_none() {
            let page = parse_page(&task, &response).map_err(|e| TaskError::other(e.to_string()))?;
            parsed = Some(pipeline.on_parse(&task, &response, page.to_value()).await?);
            follow_ups = pipeline.on_follow(&task, page.follow_ups).await?;
        }

        let mut result = TaskResult::success(task, response, started.elapsed());
        result.parsed = parsed;
        result.follow_ups = follow_ups;

        Ok(pipeline.on_task_complete(result).await?)
    }

    async fn submit_follow_ups(&self, result: &TaskResult) {
        for child in &result.follow_ups {
            match self.add_task(child.clone()).await {
                Ok(_) => self.inner.lock_summary().discovered += 1,
                Err(EngineError::Pipeline(PipelineError::Hook {
                    source: PluginError::Duplicate { url },
                    ..
                })) => {
                    tracing::trace!(url = %url, "Follow-up already seen");
                }
                Err(e) => {
                    tracing::warn!(url = %child.url, "Dropped follow-up: {}", e);
                }
            }
        }
    }

    async fn handle_failure(&self, task: Task, error: &TaskError, elapsed: Duration) {
        let directive = match self.inner.pipeline.on_task_error(&task, error).await {
            Ok(directives) => directives.into_iter().next(),
            Err(e) => {
                tracing::warn!(url = %task.url, "on_task_error failed: {}", e);
                None
            }
        };

        match directive {
            Some(directive) => self.schedule_retry(task, directive),
            None => {
                tracing::warn!(url = %task.url, "Task failed: {}", error);
                self.inner.lock_summary().failed += 1;
                if let Some(callback) = &task.on_result {
                    let result = TaskResult::failure(task.clone(), error.clone(), elapsed);
                    callback(&result);
                }
            }
        }
    }

    fn schedule_retry(&self, mut task: Task, directive: RetryDirective) {
        self.inner.pending_retries.fetch_add(1, Ordering::SeqCst);
        self.inner.lock_summary().retried += 1;

        tracing::debug!(
            url = %task.url,
            attempt = directive.attempt,
            delay_ms = directive.delay.as_millis() as u64,
            "Retry scheduled"
        );

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(directive.delay).await;

            if let Err(e) = engine
                .inner
                .pipeline
                .on_task_retry(&task, directive.attempt)
                .await
            {
                tracing::warn!(url = %task.url, "on_task_retry failed: {}", e);
            }

            task.metadata
                .insert(META_RETRY_COUNT.to_string(), json!(directive.attempt));
            let url = task.url.clone();
            if let Err(e) = engine.inner.scheduler.enqueue(task) {
                tracing::warn!(url = %url, "Retry dropped: {}", e);
                engine.inner.lock_summary().failed += 1;
            }

            engine.inner.pending_retries.fetch_sub(1, Ordering::SeqCst);
            engine.inner.retry_settled.notify_waiters();
        });
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("pipeline", &self.inner.pipeline)
            .field("pending_retries", &self.inner.pending_retries)
            .finish()
    }
}

/// Plugins enabled in the configuration, in registration order
///
/// The duplicate filter is built by the caller, which keeps a handle to it.
fn builtin_plugins(
    config: &EngineConfig,
    duplicates: Option<Arc<DuplicateFilter>>,
) -> Vec<Arc<dyn Plugin>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
    if let Some(duplicates) = duplicates {
        plugins.push(duplicates);
    }
    if config.rate_limit.enabled {
        plugins.push(Arc::new(RateLimiter::new(config.rate_limit.clone())));
    }
    if config.delay.enabled {
        plugins.push(Arc::new(DelayController::new(config.delay.clone())));
    }
    if config.retry.enabled {
        plugins.push(Arc::new(RetryController::new(config.retry.clone())));
    }
    plugins
}

/// Scheduler executor that runs tasks through the engine
///
/// Holds the engine weakly so the scheduler does not keep it alive.
struct CrawlExecutor {
    engine: Weak<EngineInner>,
}

#[async_trait]
impl TaskExecutor for CrawlExecutor {
    async fn execute(&self, task: Task) -> Result<TaskResult, TaskError> {
        let Some(inner) = self.engine.upgrade() else {
            return Err(TaskError::other("Engine has been dropped"));
        };
        Engine { inner }.process(task).await
    }
}
