use super::{CpuUsage, MemoryUsage};
use std::fs;
use std::sync::{Mutex, PoisonError};

/// Source of memory and CPU figures for the monitor
pub trait UsageSampler: Send + Sync {
    fn sample_memory(&self) -> MemoryUsage;

    fn sample_cpu(&self) -> CpuUsage;
}

impl<S: UsageSampler + ?Sized> UsageSampler for std::sync::Arc<S> {
    fn sample_memory(&self) -> MemoryUsage {
        (**self).sample_memory()
    }

    fn sample_cpu(&self) -> CpuUsage {
        (**self).sample_cpu()
    }
}

/// Reads process and host figures from `/proc`
///
/// Memory is the resident set of this process (`VmRSS` in `/proc/self/status`)
/// against the host's total.
/// CPU usage is the 1-minute load average spread over the available cores.
/// On platforms without `/proc` every figure reads as zero, which keeps the
/// gate open.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSampler;

impl SystemSampler {
    fn resident_bytes() -> Option<u64> {
        let status = fs::read_to_string("/proc/self/status").ok()?;
        kib_field(&status, "VmRSS:")
    }

    fn total_bytes() -> Option<u64> {
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        kib_field(&meminfo, "MemTotal:")
    }

    fn load_average() -> Option<[f64; 3]> {
        let loadavg = fs::read_to_string("/proc/loadavg").ok()?;
        let mut fields = loadavg.split_whitespace();
        let mut out = [0.0; 3];
        for slot in out.iter_mut() {
            *slot = fields.next()?.parse().ok()?;
        }
        Some(out)
    }
}

impl UsageSampler for SystemSampler {
    fn sample_memory(&self) -> MemoryUsage {
        let used = Self::resident_bytes().unwrap_or(0);
        let total = Self::total_bytes().unwrap_or(0);
        let percentage = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        MemoryUsage {
            used,
            total,
            percentage,
        }
    }

    fn sample_cpu(&self) -> CpuUsage {
        let load_average = Self::load_average().unwrap_or([0.0; 3]);
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;
        let usage = (load_average[0] / cores * 100.0).clamp(0.0, 100.0);
        CpuUsage {
            usage,
            load_average,
        }
    }
}

/// Reads a `Key:   1234 kB` line of a `/proc` file, in bytes
fn kib_field(text: &str, key: &str) -> Option<u64> {
    let line = text.lines().find(|l| l.starts_with(key))?;
    let kb: u64 = line[key.len()..].split_whitespace().next()?.parse().ok()?;
    Some(kb * 1024)
}

/// Sampler that reports values set by the caller
///
/// Useful when host metrics should not influence admission, and in tests.
#[derive(Debug, Default)]
pub struct StaticSampler {
    memory: Mutex<MemoryUsage>,
    cpu: Mutex<CpuUsage>,
}

impl StaticSampler {
    /// A sampler reporting zero usage
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_memory(&self, used: u64, total: u64) {
        let percentage = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        *self.memory.lock().unwrap_or_else(PoisonError::into_inner) = MemoryUsage {
            used,
            total,
            percentage,
        };
    }

    pub fn set_cpu(&self, usage: f64) {
        *self.cpu.lock().unwrap_or_else(PoisonError::into_inner) = CpuUsage {
            usage,
            load_average: [0.0; 3],
        };
    }
}

impl UsageSampler for StaticSampler {
    fn sample_memory(&self) -> MemoryUsage {
        *self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sample_cpu(&self) -> CpuUsage {
        *self.cpu.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
