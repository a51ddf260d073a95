//! Built-in policy plugins
//!
//! | Plugin              | Priority | Hooks                          |
//! |---------------------|----------|--------------------------------|
//! | [`DuplicateFilter`] | 100      | `on_task_create`               |
//! | [`RateLimiter`]     | 90       | `on_request`, `on_response`    |
//! | [`DelayController`] | 80       | `on_request`                   |
//! | [`RetryController`] | 70       | `on_task_error`, `on_task_complete` |
//!
//! Each instance owns its per-domain state; two engines never share buckets,
//! delay timestamps or fingerprints.

mod delay;
mod duplicate_filter;
mod rate_limiter;
mod retry;

pub use delay::{DelayConfig, DelayController, DELAY_CONTROLLER};
pub use duplicate_filter::{
    DuplicateFilter, DuplicateFilterConfig, Fingerprint, Normalizer, DUPLICATE_FILTER,
};
pub use rate_limiter::{
    parse_retry_after, BucketConfig, RateLimitConfig, RateLimiter, TokenBucket, RATE_LIMITER,
};
pub use retry::{RetryAttempt, RetryConfig, RetryController, RetryPredicate, RETRY_CONTROLLER};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, Plugin};
    use std::sync::Arc;

    #[test]
    fn test_builtin_order() {
        let pipeline = Pipeline::new();
        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(RetryController::new(RetryConfig::default())),
            Arc::new(DelayController::new(DelayConfig::default())),
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            Arc::new(DuplicateFilter::new(DuplicateFilterConfig::default())),
        ];
        for plugin in plugins {
            pipeline.register(plugin).unwrap();
        }

        let names: Vec<String> = pipeline.plugins().into_iter().map(|i| i.name).collect();
        assert_eq!(
            names,
            vec![DUPLICATE_FILTER, RATE_LIMITER, DELAY_CONTROLLER, RETRY_CONTROLLER]
        );
    }
}
