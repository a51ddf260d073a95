use super::{
    AvailableCapacity, MemoryPressure, ResourceKind, ResourceLimits, ResourceUsage,
    SystemSampler, UsageSampler, Utilization, EXCEEDED_THRESHOLD, WARNING_THRESHOLD,
};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const EVENT_CAPACITY: usize = 256;

/// Notifications emitted after each sample
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// A fresh snapshot
    Update(ResourceUsage),

    /// A resource reached 80% of its limit
    LimitWarning {
        resource: ResourceKind,
        current: f64,
        limit: f64,
        percentage: f64,
    },

    /// A resource reached 100% of its limit
    LimitExceeded {
        resource: ResourceKind,
        current: f64,
        limit: f64,
        percentage: f64,
    },
}

struct MonitorInner {
    limits: ResourceLimits,
    sampler: Box<dyn UsageSampler>,
    usage: Mutex<ResourceUsage>,
    events: broadcast::Sender<ResourceEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Periodic sampler of memory, CPU, connection and queue usage
///
/// Cloning yields another handle to the same monitor. Memory and CPU come
/// from the sampler; connection and queue counts are pushed by the scheduler
/// through [`update_active_connections`](Self::update_active_connections) and
/// [`update_queue_size`](Self::update_queue_size).
#[derive(Clone)]
pub struct ResourceMonitor {
    inner: Arc<MonitorInner>,
}

impl ResourceMonitor {
    /// Creates a monitor that samples the host through `/proc`
    pub fn new(limits: ResourceLimits) -> Self {
        Self::with_sampler(limits, Box::new(SystemSampler))
    }

    /// Creates a monitor reading memory and CPU figures from `sampler`
    pub fn with_sampler(limits: ResourceLimits, sampler: Box<dyn UsageSampler>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                limits,
                sampler,
                usage: Mutex::new(ResourceUsage::default()),
                events,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.inner.limits
    }

    /// Subscribes to resource events
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.inner.events.subscribe()
    }

    /// Starts sampling every `check_interval` milliseconds
    ///
    /// The first sample is taken immediately. Calling this while monitoring
    /// is already running has no effect. Must be called within a Tokio
    /// runtime.
    pub fn start_monitoring(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let period = Duration::from_millis(self.inner.limits.check_interval.max(1));
        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);

        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Stop once every handle to the monitor is gone
                let Some(inner) = weak.upgrade() else { break };
                inner.refresh();
            }
        }));

        tracing::debug!(interval_ms = period.as_millis() as u64, "Resource monitoring started");
    }

    /// Stops periodic sampling
    pub fn stop_monitoring(&self) {
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Resource monitoring stopped");
        }
    }

    /// Whether periodic sampling is running
    pub fn is_monitoring(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Takes one sample now, emits the update and any limit events
    pub fn refresh(&self) -> ResourceUsage {
        self.inner.refresh()
    }

    /// Records the number of in-flight tasks
    pub fn update_active_connections(&self, count: usize) {
        self.inner.lock_usage().active_connections = count;
    }

    /// Records the number of queued tasks
    pub fn update_queue_size(&self, size: usize) {
        self.inner.lock_usage().queue_size = size;
    }

    /// Copy of the latest snapshot
    pub fn current_usage(&self) -> ResourceUsage {
        self.inner.lock_usage().clone()
    }

    /// True if every resource is under its limit
    pub fn is_within_limits(&self) -> bool {
        self.are_within_limits(&ResourceKind::ALL)
    }

    /// True if each of `kinds` is under its limit, judged on one snapshot
    pub fn are_within_limits(&self, kinds: &[ResourceKind]) -> bool {
        let usage = self.current_usage();
        kinds.iter().all(|kind| self.inner.within(&usage, *kind))
    }

    /// True if the given resource is under its limit
    pub fn is_resource_available(&self, kind: ResourceKind) -> bool {
        let usage = self.current_usage();
        self.inner.within(&usage, kind)
    }

    /// Usage of each resource as a percentage of its limit
    pub fn utilization(&self) -> Utilization {
        self.inner.utilization(&self.current_usage())
    }

    /// Headroom left under each limit, floored at zero
    pub fn available_capacity(&self) -> AvailableCapacity {
        let usage = self.current_usage();
        let limits = &self.inner.limits;
        AvailableCapacity {
            memory: limits.max_memory_usage.saturating_sub(usage.memory.used),
            cpu: (limits.max_cpu_usage - usage.cpu.usage).max(0.0),
            connections: limits
                .max_active_connections
                .saturating_sub(usage.active_connections),
            queue_size: limits.max_queue_size.saturating_sub(usage.queue_size),
        }
    }

    /// Memory pressure band of the latest snapshot
    pub fn memory_pressure(&self) -> MemoryPressure {
        MemoryPressure::from_percentage(self.utilization().memory)
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("limits", &self.inner.limits)
            .field("usage", &self.current_usage())
            .finish()
    }
}

impl MonitorInner {
    fn lock_usage(&self) -> std::sync::MutexGuard<'_, ResourceUsage> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self) -> ResourceUsage {
        let memory = self.sampler.sample_memory();
        let cpu = self.sampler.sample_cpu();

        let snapshot = {
            let mut usage = self.lock_usage();
            usage.memory = memory;
            usage.cpu = cpu;
            usage.timestamp = Utc::now();
            usage.clone()
        };

        // No subscribers is not an error
        let _ = self.events.send(ResourceEvent::Update(snapshot.clone()));
        self.check_limits(&snapshot);
        snapshot
    }

    fn check_limits(&self, usage: &ResourceUsage) {
        for kind in ResourceKind::ALL {
            let (current, limit) = self.figures(usage, kind);
            let percentage = percent(current, limit);

            if percentage >= WARNING_THRESHOLD {
                tracing::debug!(resource = %kind, percentage, "Resource usage warning");
                let _ = self.events.send(ResourceEvent::LimitWarning {
                    resource: kind,
                    current,
                    limit,
                    percentage,
                });
            }
            if percentage >= EXCEEDED_THRESHOLD {
                tracing::warn!(resource = %kind, current, limit, "Resource limit exceeded");
                let _ = self.events.send(ResourceEvent::LimitExceeded {
                    resource: kind,
                    current,
                    limit,
                    percentage,
                });
            }
        }
    }

    /// Current value and limit of a resource, in comparable units
    fn figures(&self, usage: &ResourceUsage, kind: ResourceKind) -> (f64, f64) {
        let limits = &self.limits;
        match kind {
            ResourceKind::Memory => (usage.memory.used as f64, limits.max_memory_usage as f64),
            ResourceKind::Cpu => (usage.cpu.usage, limits.max_cpu_usage),
            ResourceKind::Connections => (
                usage.active_connections as f64,
                limits.max_active_connections as f64,
            ),
            ResourceKind::QueueSize => {
                (usage.queue_size as f64, limits.max_queue_size as f64)
            }
        }
    }

    // Agrees with the exceeded threshold: a resource at its limit is exhausted
    fn within(&self, usage: &ResourceUsage, kind: ResourceKind) -> bool {
        let (current, limit) = self.figures(usage, kind);
        current < limit
    }

    fn utilization(&self, usage: &ResourceUsage) -> Utilization {
        let pct = |kind| {
            let (current, limit) = self.figures(usage, kind);
            percent(current, limit)
        };
        Utilization {
            memory: pct(ResourceKind::Memory),
            cpu: pct(ResourceKind::Cpu),
            connections: pct(ResourceKind::Connections),
            queue_size: pct(ResourceKind::QueueSize),
        }
    }
}

fn percent(current: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        current / limit * 100.0
    } else if current > 0.0 {
        EXCEEDED_THRESHOLD
    } else {
        0.0
    }
}
