use super::{
    QueueStats, ResourceStats, RunningStats, SchedulerConfig, SchedulerEvent, SchedulerStats,
    SchedulerStatus, TaskExecutor,
};
use crate::queue::{MultiLevelQueue, PriorityQueue, TaskId, TaskQueue};
use crate::resource::{ResourceKind, ResourceMonitor};
use crate::state::{TaskState, TaskStatus};
use crate::task::{Task, TaskResult};
use crate::{QueueError, TaskError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const EVENT_CAPACITY: usize = 1024;

/// Why the last tick admitted nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocked {
    Empty,
    Concurrency,
    Resources,
}

struct SchedulerState {
    queue: Box<dyn TaskQueue<Task>>,
    running: HashMap<TaskId, TaskState>,
    executor: Option<Arc<dyn TaskExecutor>>,
    status: SchedulerStatus,
    blocked: Option<Blocked>,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

struct SchedulerInner {
    config: SchedulerConfig,
    monitor: ResourceMonitor,
    state: Mutex<SchedulerState>,
    events: broadcast::Sender<SchedulerEvent>,
    idle: Notify,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Priority scheduler with a concurrency cap and a resource gate
///
/// Cloning yields another handle to the same scheduler.
///
/// # Example
///
/// ```no_run
/// use ripple_engine::{Scheduler, SchedulerConfig, Task, TaskResult};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), ripple_engine::QueueError> {
/// let scheduler = Scheduler::new(SchedulerConfig::default());
/// scheduler.set_executor(|task: Task| async move {
///     Ok(TaskResult::success(task, Default::default(), Duration::ZERO))
/// });
/// scheduler.enqueue(Task::new("https://example.com/").with_priority(3))?;
/// scheduler.start();
/// scheduler.wait_until_idle().await;
/// scheduler.stop();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler with its own resource monitor
    pub fn new(config: SchedulerConfig) -> Self {
        let monitor = ResourceMonitor::new(config.resource_limits.clone());
        Self::with_resource_monitor(config, monitor)
    }

    /// Creates a scheduler gated by the given monitor
    pub fn with_resource_monitor(config: SchedulerConfig, monitor: ResourceMonitor) -> Self {
        let queue: Box<dyn TaskQueue<Task>> = if config.priority_levels > 1 {
            Box::new(MultiLevelQueue::new(config.priority_levels))
        } else {
            Box::new(PriorityQueue::new())
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                monitor,
                state: Mutex::new(SchedulerState {
                    queue,
                    running: HashMap::new(),
                    executor: None,
                    status: SchedulerStatus::Stopped,
                    blocked: None,
                    completed: 0,
                    failed: 0,
                    cancelled: 0,
                }),
                events,
                idle: Notify::new(),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn resource_monitor(&self) -> &ResourceMonitor {
        &self.inner.monitor
    }

    /// Subscribes to scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Sets the function that performs each task
    ///
    /// Until an executor is set, queued tasks stay queued.
    pub fn set_executor<E>(&self, executor: E)
    where
        E: TaskExecutor + 'static,
    {
        self.set_executor_arc(Arc::new(executor));
    }

    /// Same as [`set_executor`](Self::set_executor) for an executor that is
    /// already shared
    pub fn set_executor_arc(&self, executor: Arc<dyn TaskExecutor>) {
        self.inner.lock_state().executor = Some(executor);
    }

    /// Queues a task
    ///
    /// # Returns
    ///
    /// * `Ok(TaskId)` - The id under which the task was queued
    /// * `Err(QueueError::Full)` - The queue already holds `max_queue_size` tasks
    pub fn enqueue(&self, task: Task) -> Result<TaskId, QueueError> {
        let mut state = self.inner.lock_state();
        let size = state.queue.len();
        let max = self.inner.config.max_queue_size;
        if size >= max {
            drop(state);
            tracing::warn!("Queue full ({}/{}), rejecting {}", size, max, task.url);
            self.inner.emit(SchedulerEvent::QueueFull { size, max });
            return Err(QueueError::Full { size, max });
        }

        let url = task.url.clone();
        let priority = task.priority;
        let id = state.queue.enqueue(task, priority);
        self.inner.monitor.update_queue_size(state.queue.len());
        drop(state);

        tracing::debug!(task_id = %id, url = %url, priority, "Task queued");
        self.inner
            .emit(SchedulerEvent::TaskQueued { id, url, priority });
        Ok(id)
    }

    /// Starts (or restarts) the admission loop and resource sampling
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) {
        self.inner.lock_state().status = SchedulerStatus::Running;

        let mut ticker = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if ticker.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        self.inner.monitor.start_monitoring();

        let period = Duration::from_millis(self.inner.config.poll_interval.max(1));
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        *ticker = Some(tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                SchedulerInner::tick(&inner);
            }
        }));

        tracing::info!(
            concurrency = self.inner.config.concurrency,
            poll_interval_ms = period.as_millis() as u64,
            "Scheduler started"
        );
    }

    /// Stops the admission loop
    ///
    /// Queued tasks stay queued. Tasks already running finish normally.
    pub fn stop(&self) {
        self.inner.lock_state().status = SchedulerStatus::Stopped;
        let handle = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.inner.monitor.stop_monitoring();
        tracing::info!("Scheduler stopped");
    }

    /// Suspends admissions without stopping the loop
    pub fn pause(&self) {
        let mut state = self.inner.lock_state();
        if state.status == SchedulerStatus::Running {
            state.status = SchedulerStatus::Paused;
            tracing::info!("Scheduler paused");
        }
    }

    /// Resumes admissions after [`pause`](Self::pause)
    pub fn resume(&self) {
        let mut state = self.inner.lock_state();
        if state.status == SchedulerStatus::Paused {
            state.status = SchedulerStatus::Running;
            tracing::info!("Scheduler resumed");
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.lock_state().status
    }

    /// Cancels a queued or running task
    ///
    /// A queued task is removed from the queue. A running task is marked
    /// cancelled and no longer counts against the concurrency cap; its
    /// executor keeps going and whatever it returns is ignored.
    ///
    /// Returns false if the id is neither queued nor running.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.inner.lock_state();

        let cancelled = if let Some(mut task_state) = state.running.remove(&id) {
            task_state.transition(TaskStatus::Cancelled);
            true
        } else {
            state.queue.remove(id)
        };
        if !cancelled {
            return false;
        }

        state.cancelled += 1;
        self.inner.push_counters(&state);
        let idle = state.is_idle();
        drop(state);

        tracing::debug!(task_id = %id, "Task cancelled");
        self.inner.emit(SchedulerEvent::TaskCancelled { id });
        if idle {
            self.inner.idle.notify_waiters();
        }
        true
    }

    /// State of a running task
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.inner.lock_state().running.get(&id).cloned()
    }

    /// True when nothing is queued and nothing is running
    pub fn is_idle(&self) -> bool {
        self.inner.lock_state().is_idle()
    }

    /// Waits until nothing is queued and nothing is running
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        let state = self.inner.lock_state();
        self.inner.queue_stats(&state)
    }

    pub fn running_stats(&self) -> RunningStats {
        let state = self.inner.lock_state();
        self.inner.running_stats(&state)
    }

    pub fn resource_stats(&self) -> ResourceStats {
        let monitor = &self.inner.monitor;
        ResourceStats {
            usage: monitor.current_usage(),
            utilization: monitor.utilization(),
            available: monitor.available_capacity(),
            memory_pressure: monitor.memory_pressure(),
            within_limits: monitor.is_within_limits(),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let (status, queue, running, completed, failed, cancelled) = {
            let state = self.inner.lock_state();
            (
                state.status,
                self.inner.queue_stats(&state),
                self.inner.running_stats(&state),
                state.completed,
                state.failed,
                state.cancelled,
            )
        };
        SchedulerStats {
            status,
            queue,
            running,
            resources: self.resource_stats(),
            completed,
            failed,
            cancelled,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl SchedulerState {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SchedulerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn push_counters(&self, state: &SchedulerState) {
        self.monitor.update_active_connections(state.running.len());
        self.monitor.update_queue_size(state.queue.len());
    }

    /// Records a blocked tick, emitting only when the reason changes
    fn block(&self, state: &mut SchedulerState, reason: Blocked, event: SchedulerEvent) {
        if state.blocked != Some(reason) {
            state.blocked = Some(reason);
            tracing::trace!(?reason, "Admission blocked");
            self.emit(event);
        }
    }

    /// One admission attempt
    fn tick(inner: &Arc<SchedulerInner>) {
        let (id, task, executor) = {
            let mut state = inner.lock_state();
            if state.status != SchedulerStatus::Running {
                return;
            }

            let running = state.running.len();
            let limit = inner.config.concurrency;
            if running >= limit {
                inner.block(
                    &mut state,
                    Blocked::Concurrency,
                    SchedulerEvent::ConcurrencyLimit { running, limit },
                );
                return;
            }

            if !inner.monitor.are_within_limits(&ResourceKind::ADMISSION) {
                let usage = inner.monitor.current_usage();
                inner.block(
                    &mut state,
                    Blocked::Resources,
                    SchedulerEvent::ResourceLimit { usage },
                );
                return;
            }

            let Some(executor) = state.executor.clone() else {
                return;
            };

            let Some(item) = state.queue.dequeue() else {
                if state.running.is_empty() {
                    inner.block(&mut state, Blocked::Empty, SchedulerEvent::QueueEmpty);
                    drop(state);
                    inner.idle.notify_waiters();
                }
                return;
            };

            let waited = chrono::Duration::from_std(item.enqueued_at.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero());
            let mut task_state =
                TaskState::new(item.id, item.value.url.clone(), item.priority, Utc::now() - waited);
            task_state.retry_count = item.value.retry_count();
            task_state.transition(TaskStatus::Running);

            state.running.insert(item.id, task_state);
            state.blocked = None;
            inner.push_counters(&state);

            (item.id, item.value, executor)
        };

        tracing::debug!(task_id = %id, url = %task.url, "Task started");
        inner.emit(SchedulerEvent::TaskStarted {
            id,
            url: task.url.clone(),
        });

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            // A panicking executor must not leave the task stuck as running
            let outcome = match tokio::spawn(async move { executor.execute(task).await }).await {
                Ok(outcome) => outcome,
                Err(err) => Err(TaskError::other(format!("Executor aborted: {}", err))),
            };
            inner.finish(id, outcome);
        });
    }

    /// Applies an executor outcome to the bookkeeping
    fn finish(&self, id: TaskId, outcome: Result<TaskResult, TaskError>) {
        let mut state = self.lock_state();
        let Some(mut task_state) = state.running.remove(&id) else {
            tracing::debug!(task_id = %id, "Discarding outcome of cancelled task");
            return;
        };

        let event = match outcome {
            Ok(result) => {
                task_state.transition(TaskStatus::Completed);
                state.completed += 1;
                tracing::debug!(task_id = %id, url = %task_state.url, "Task completed");
                SchedulerEvent::TaskCompleted {
                    id,
                    result: Arc::new(result),
                }
            }
            Err(error) => {
                tracing::debug!(task_id = %id, url = %task_state.url, error = %error, "Task failed");
                task_state.fail(error.clone());
                state.failed += 1;
                SchedulerEvent::TaskFailed {
                    id,
                    url: task_state.url.clone(),
                    error,
                }
            }
        };

        self.push_counters(&state);
        let idle = state.is_idle();
        drop(state);

        self.emit(event);
        if idle {
            self.idle.notify_waiters();
        }
    }

    fn queue_stats(&self, state: &SchedulerState) -> QueueStats {
        QueueStats {
            size: state.queue.len(),
            max_size: self.config.max_queue_size,
            priority_levels: self.config.priority_levels,
            next_priority: state.queue.peek().map(|item| item.priority),
        }
    }

    fn running_stats(&self, state: &SchedulerState) -> RunningStats {
        let mut tasks: Vec<TaskState> = state.running.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        RunningStats {
            count: tasks.len(),
            concurrency: self.config.concurrency,
            tasks,
        }
    }
}
