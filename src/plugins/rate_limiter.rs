//! Token-bucket rate limiting
//!
//! One global bucket caps the overall request rate and one bucket per domain
//! caps each host. Buckets refill lazily from elapsed time whenever they are
//! consulted. A `Retry-After` header on any response blocks its domain until
//! the indicated time.

use crate::pipeline::{Plugin, PluginInfo, RequestHooks};
use crate::state::DomainState;
use crate::task::{Response, Task};
use crate::url::lookup_override;
use crate::PluginError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const RATE_LIMITER: &str = "rate-limiter";

/// Size and refill speed of one bucket
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BucketConfig {
    /// Maximum burst, in requests
    pub capacity: u32,

    /// Tokens added per second
    pub refill_rate: f64,
}

impl BucketConfig {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self::new(5, 2.0)
    }
}

/// Rate limiter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Global bucket capacity
    pub capacity: u32,

    /// Global bucket refill rate (tokens per second)
    pub refill_rate: f64,

    /// Bucket used for any domain without an override
    pub per_domain: BucketConfig,

    /// Per-domain overrides; keys may use `*.` wildcards
    pub domains: HashMap<String, BucketConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 50,
            refill_rate: 20.0,
            per_domain: BucketConfig::default(),
            domains: HashMap::new(),
        }
    }
}

/// A refillable count of request permits
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate,
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    pub fn from_config(config: &BucketConfig, now: Instant) -> Self {
        Self::new(config.capacity, config.refill_rate, now)
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Takes one token
    ///
    /// # Returns
    ///
    /// * `Ok(())` - A token was taken
    /// * `Err(wait)` - Not enough tokens; one will be available after `wait`
    pub fn try_consume(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        if self.refill_rate <= 0.0 {
            return Err(Duration::from_secs(1));
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(missing / self.refill_rate))
    }

    /// Tokens available at `now`
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

struct DomainLimit {
    bucket: TokenBucket,
    state: DomainState,
}

/// Global plus per-domain token-bucket limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    global: Mutex<TokenBucket>,
    domains: Mutex<HashMap<String, DomainLimit>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let global = TokenBucket::new(config.capacity, config.refill_rate, Instant::now());
        Self {
            config,
            global: Mutex::new(global),
            domains: Mutex::new(HashMap::new()),
        }
    }

    fn lock_global(&self) -> MutexGuard<'_, TokenBucket> {
        self.global.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_domains(&self) -> MutexGuard<'_, HashMap<String, DomainLimit>> {
        self.domains.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bucket settings that apply to a domain
    pub fn bucket_config(&self, domain: &str) -> &BucketConfig {
        lookup_override(&self.config.domains, domain).unwrap_or(&self.config.per_domain)
    }

    fn with_domain<R>(&self, domain: &str, f: impl FnOnce(&mut DomainLimit) -> R) -> R {
        let mut domains = self.lock_domains();
        let limit = domains.entry(domain.to_string()).or_insert_with(|| DomainLimit {
            bucket: TokenBucket::from_config(self.bucket_config(domain), Instant::now()),
            state: DomainState::new(),
        });
        f(limit)
    }

    /// Waits for a global token, then a token for `domain`
    pub async fn acquire(&self, domain: Option<&str>) {
        if let Some(domain) = domain {
            let blocked = self.with_domain(domain, |limit| limit.state.remaining_block(Instant::now()));
            if let Some(wait) = blocked {
                tracing::debug!(domain = %domain, wait_ms = wait.as_millis() as u64, "Domain blocked by Retry-After");
                tokio::time::sleep(wait).await;
            }
        }

        loop {
            let outcome = self.lock_global().try_consume(Instant::now());
            match outcome {
                Ok(()) => break,
                Err(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "Waiting for global token");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        let Some(domain) = domain else { return };
        loop {
            let outcome = self.with_domain(domain, |limit| {
                let now = Instant::now();
                let outcome = limit.bucket.try_consume(now);
                if outcome.is_ok() {
                    limit.state.record_request(now);
                }
                outcome
            });
            match outcome {
                Ok(()) => break,
                Err(wait) => {
                    tracing::trace!(domain = %domain, wait_ms = wait.as_millis() as u64, "Waiting for domain token");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Blocks a domain for `wait` from now
    pub fn block_domain(&self, domain: &str, wait: Duration) {
        let until = Instant::now() + wait;
        self.with_domain(domain, |limit| limit.state.block_until(until));
    }

    /// Remaining `Retry-After` block of a domain
    pub fn blocked_for(&self, domain: &str) -> Option<Duration> {
        self.lock_domains()
            .get_mut(domain)
            .and_then(|limit| limit.state.remaining_block(Instant::now()))
    }

    /// Tokens currently available for a domain (a full bucket if unseen)
    pub fn available_tokens(&self, domain: &str) -> f64 {
        self.with_domain(domain, |limit| limit.bucket.available(Instant::now()))
    }

    /// Requests let through to a domain so far
    pub fn request_count(&self, domain: &str) -> u32 {
        self.lock_domains()
            .get(domain)
            .map(|limit| limit.state.request_count)
            .unwrap_or(0)
    }

    /// Number of domains with a bucket
    pub fn domain_count(&self) -> usize {
        self.lock_domains().len()
    }
}

/// Parses a `Retry-After` value, either delay-seconds or an HTTP-date
///
/// Dates in the past yield a zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

impl Plugin for RateLimiter {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(RATE_LIMITER, env!("CARGO_PKG_VERSION")).with_priority(90)
    }

    fn request_hooks(&self) -> Option<&dyn RequestHooks> {
        Some(self)
    }
}

#[async_trait]
impl RequestHooks for RateLimiter {
    async fn on_request(&self, task: &Task) -> Result<Option<Task>, PluginError> {
        let domain = task.domain();
        self.acquire(domain.as_deref()).await;
        Ok(None)
    }

    async fn on_response(
        &self,
        task: &Task,
        response: &Response,
    ) -> Result<Option<Response>, PluginError> {
        let Some(header) = response.header("retry-after") else {
            return Ok(None);
        };
        let Some(domain) = task.domain() else {
            return Ok(None);
        };

        match parse_retry_after(header, Utc::now()) {
            Some(wait) if !wait.is_zero() => {
                tracing::info!(
                    domain = %domain,
                    wait_secs = wait.as_secs(),
                    "Retry-After received, blocking domain"
                );
                self.block_domain(&domain, wait);
            }
            Some(_) => {}
            None => tracing::debug!(domain = %domain, value = %header, "Ignoring unparsable Retry-After"),
        }
        Ok(None)
    }
}
