//! Resource monitoring for the scheduler's admission gate
//!
//! The [`ResourceMonitor`] periodically samples process memory and host CPU
//! load, merges them with the connection and queue counters pushed in by the
//! scheduler, and compares each dimension against [`ResourceLimits`].
//! Breaches are reported as [`ResourceEvent`]s on a broadcast channel; the
//! scheduler only consults the point-in-time queries.

mod monitor;
mod sampler;

pub use monitor::{ResourceEvent, ResourceMonitor};
pub use sampler::{StaticSampler, SystemSampler, UsageSampler};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Warning threshold, as a percentage of a limit
pub const WARNING_THRESHOLD: f64 = 80.0;

/// Exceeded threshold, as a percentage of a limit
pub const EXCEEDED_THRESHOLD: f64 = 100.0;

/// Per-resource ceilings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResourceLimits {
    /// Maximum resident memory of the process, in bytes
    pub max_memory_usage: u64,

    /// Maximum CPU usage, in percent
    pub max_cpu_usage: f64,

    /// Maximum number of in-flight tasks
    pub max_active_connections: usize,

    /// Maximum number of queued tasks
    pub max_queue_size: usize,

    /// Sampling interval in milliseconds
    pub check_interval: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_usage: 1024 * 1024 * 1024,
            max_cpu_usage: 80.0,
            max_active_connections: 100,
            max_queue_size: 1000,
            check_interval: 5000,
        }
    }
}

/// Memory figures of a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    /// Resident bytes of this process
    pub used: u64,
    /// Total bytes of the host
    pub total: u64,
    /// `used / total` in percent
    pub percentage: f64,
}

/// CPU figures of a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuUsage {
    /// Estimated usage in percent (0..=100)
    pub usage: f64,
    /// 1, 5 and 15 minute load averages
    pub load_average: [f64; 3],
}

/// Point-in-time view of every monitored resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub memory: MemoryUsage,
    pub cpu: CpuUsage,
    pub active_connections: usize,
    pub queue_size: usize,
    pub timestamp: DateTime<Utc>,
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self {
            memory: MemoryUsage::default(),
            cpu: CpuUsage::default(),
            active_connections: 0,
            queue_size: 0,
            timestamp: Utc::now(),
        }
    }
}

/// The monitored dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Memory,
    Cpu,
    Connections,
    QueueSize,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Memory,
        ResourceKind::Cpu,
        ResourceKind::Connections,
        ResourceKind::QueueSize,
    ];

    /// Resources an admitted task consumes
    ///
    /// The queue shrinks on admission, so its size never gates it.
    pub const ADMISSION: [ResourceKind; 3] = [
        ResourceKind::Memory,
        ResourceKind::Cpu,
        ResourceKind::Connections,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::Cpu => "cpu",
            Self::Connections => "connections",
            Self::QueueSize => "queue_size",
        };
        write!(f, "{}", name)
    }
}

/// Usage of each resource as a percentage of its limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Utilization {
    pub memory: f64,
    pub cpu: f64,
    pub connections: f64,
    pub queue_size: f64,
}

impl Utilization {
    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Memory => self.memory,
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Connections => self.connections,
            ResourceKind::QueueSize => self.queue_size,
        }
    }
}

/// Headroom left under each limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AvailableCapacity {
    /// Bytes
    pub memory: u64,
    /// Percentage points
    pub cpu: f64,
    pub connections: usize,
    pub queue_size: usize,
}

/// Qualitative memory pressure derived from memory utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemoryPressure {
    /// Below 50%
    Low,
    /// 50% to 70%
    Medium,
    /// 70% to 90%
    High,
    /// 90% and above
    Critical,
}

impl MemoryPressure {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage < 50.0 {
            Self::Low
        } else if percentage < 70.0 {
            Self::Medium
        } else if percentage < 90.0 {
            Self::High
        } else {
            Self::Critical
        }
    }
}
