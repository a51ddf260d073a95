//! Per-domain politeness delay
//!
//! Requests to the same domain are spaced by a delay taken from, in order,
//! the task's `delay` metadata, a per-domain override, or the default. The
//! delay may be randomized by a configurable factor.

use crate::pipeline::{Plugin, PluginInfo, RequestHooks};
use crate::state::DomainState;
use crate::task::{Task, META_DELAY};
use crate::url::lookup_override;
use crate::PluginError;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DELAY_CONTROLLER: &str = "delay-controller";

/// Delay controller settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DelayConfig {
    pub enabled: bool,

    /// Spacing between requests to one domain, in milliseconds
    pub default_delay: u64,

    /// Spread each delay uniformly over `delay * (1 ± random_factor)`
    pub randomize: bool,

    pub random_factor: f64,

    /// Per-domain spacing in milliseconds; keys may use `*.` wildcards
    pub domains: HashMap<String, u64>,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_delay: 1000,
            randomize: false,
            random_factor: 0.5,
            domains: HashMap::new(),
        }
    }
}

pub struct DelayController {
    config: DelayConfig,
    domains: Mutex<HashMap<String, DomainState>>,
}

impl DelayController {
    pub fn new(config: DelayConfig) -> Self {
        Self {
            config,
            domains: Mutex::new(HashMap::new()),
        }
    }

    fn lock_domains(&self) -> MutexGuard<'_, HashMap<String, DomainState>> {
        self.domains.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configured spacing for a task, before randomization
    pub fn base_delay(&self, task: &Task, domain: &str) -> Duration {
        let millis = task
            .meta_u64(META_DELAY)
            .or_else(|| lookup_override(&self.config.domains, domain).copied())
            .unwrap_or(self.config.default_delay);
        Duration::from_millis(millis)
    }

    /// Spacing to apply for a task, randomized if configured
    pub fn delay_for(&self, task: &Task, domain: &str) -> Duration {
        let base = self.base_delay(task, domain);
        if !self.config.randomize || base.is_zero() {
            return base;
        }

        let factor = self.config.random_factor.clamp(0.0, 1.0);
        let millis = base.as_millis() as f64;
        let low = millis * (1.0 - factor);
        let high = millis * (1.0 + factor);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high) as u64)
    }

    /// Reserves the next slot for `domain` and returns how long to wait for it
    fn reserve(&self, domain: &str, spacing: Duration) -> Option<Duration> {
        let now = Instant::now();
        let mut domains = self.lock_domains();
        let state = domains.entry(domain.to_string()).or_default();
        let wait = state.time_until_next_request(spacing, now);
        state.record_request(now + wait.unwrap_or(Duration::ZERO));
        wait
    }

    /// When the last request to a domain went out (or is scheduled to)
    pub fn last_request(&self, domain: &str) -> Option<Instant> {
        self.lock_domains()
            .get(domain)
            .and_then(|state| state.last_request_time)
    }

    pub fn reset(&self) {
        self.lock_domains().clear();
    }
}

impl Plugin for DelayController {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(DELAY_CONTROLLER, env!("CARGO_PKG_VERSION")).with_priority(80)
    }

    fn request_hooks(&self) -> Option<&dyn RequestHooks> {
        Some(self)
    }
}

#[async_trait]
impl RequestHooks for DelayController {
    async fn on_request(&self, task: &Task) -> Result<Option<Task>, PluginError> {
        let Some(domain) = task.domain() else {
            return Ok(None);
        };

        let spacing = self.delay_for(task, &domain);
        if let Some(wait) = self.reserve(&domain, spacing) {
            tracing::debug!(
                domain = %domain,
                wait_ms = wait.as_millis() as u64,
                "Delaying request"
            );
            tokio::time::sleep(wait).await;
        }
        Ok(None)
    }
}
