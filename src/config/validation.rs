use crate::config::types::{EngineConfig, FetchConfig, SeedEntry, UserAgentConfig};
use crate::plugins::{BucketConfig, DelayConfig, DuplicateFilterConfig, RateLimitConfig, RetryConfig};
use crate::scheduler::SchedulerConfig;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_retry_config(&config.retry)?;
    validate_delay_config(&config.delay)?;
    validate_duplicate_filter_config(&config.duplicate_filter)?;
    validate_fetch_config(&config.fetch)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates scheduler configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 1000 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 1000, got {}",
            config.concurrency
        )));
    }

    if config.max_queue_size < 1 {
        return Err(ConfigError::Validation(
            "max_queue_size must be >= 1".to_string(),
        ));
    }

    if config.priority_levels < 1 {
        return Err(ConfigError::Validation(
            "priority_levels must be >= 1".to_string(),
        ));
    }

    if config.poll_interval < 1 {
        return Err(ConfigError::Validation(
            "poll_interval must be >= 1ms".to_string(),
        ));
    }

    let limits = &config.resource_limits;
    if limits.check_interval < 1 {
        return Err(ConfigError::Validation(
            "check_interval must be >= 1ms".to_string(),
        ));
    }

    if !(limits.max_cpu_usage > 0.0 && limits.max_cpu_usage <= 100.0) {
        return Err(ConfigError::Validation(format!(
            "max_cpu_usage must be in (0, 100], got {}",
            limits.max_cpu_usage
        )));
    }

    if limits.max_memory_usage == 0
        || limits.max_active_connections == 0
        || limits.max_queue_size == 0
    {
        return Err(ConfigError::Validation(
            "resource limits must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Validates rate limiter configuration
fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    validate_bucket("rate-limit", &BucketConfig::new(config.capacity, config.refill_rate))?;
    validate_bucket("rate-limit.per-domain", &config.per_domain)?;

    for (pattern, bucket) in &config.domains {
        validate_domain_pattern(pattern)?;
        validate_bucket(&format!("rate-limit.domains.\"{}\"", pattern), bucket)?;
    }

    Ok(())
}

fn validate_bucket(section: &str, bucket: &BucketConfig) -> Result<(), ConfigError> {
    if bucket.capacity < 1 {
        return Err(ConfigError::Validation(format!(
            "{}: capacity must be >= 1, got {}",
            section, bucket.capacity
        )));
    }

    if !(bucket.refill_rate > 0.0 && bucket.refill_rate.is_finite()) {
        return Err(ConfigError::Validation(format!(
            "{}: refill_rate must be > 0, got {}",
            section, bucket.refill_rate
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.backoff_multiplier < 1.0 || !config.backoff_multiplier.is_finite() {
        return Err(ConfigError::Validation(format!(
            "backoff_multiplier must be >= 1, got {}",
            config.backoff_multiplier
        )));
    }

    if config.max_delay < config.base_delay {
        return Err(ConfigError::Validation(format!(
            "max_delay ({}ms) must be >= base_delay ({}ms)",
            config.max_delay, config.base_delay
        )));
    }

    if let Some(code) = config
        .retryable_status_codes
        .iter()
        .find(|code| !(100..=599).contains(*code))
    {
        return Err(ConfigError::Validation(format!(
            "retryable_status_codes contains invalid HTTP status {}",
            code
        )));
    }

    Ok(())
}

/// Validates delay configuration
fn validate_delay_config(config: &DelayConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.random_factor) {
        return Err(ConfigError::Validation(format!(
            "random_factor must be between 0 and 1, got {}",
            config.random_factor
        )));
    }

    for pattern in config.domains.keys() {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

/// Validates duplicate filter configuration
fn validate_duplicate_filter_config(config: &DuplicateFilterConfig) -> Result<(), ConfigError> {
    if config.max_cache_size < 1 {
        return Err(ConfigError::Validation(
            "max_cache_size must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.timeout < 1 {
        return Err(ConfigError::Validation(
            "fetch timeout must be >= 1ms".to_string(),
        ));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    // Contacts are optional, but must be well-formed when given
    if !config.contact_url.is_empty() {
        Url::parse(&config.contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    if !config.contact_email.is_empty() {
        validate_email(&config.contact_email)?;
    }

    Ok(())
}

/// Validates seed entries
fn validate_seeds(seeds: &[SeedEntry]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(&seed.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed.url, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed.url
            )));
        }

        if let Some(selector) = &seed.selector {
            if selector.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Seed '{}' has an empty follow selector",
                    seed.url
                )));
            }
        }
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    // Single-label hosts such as "localhost" are valid override keys
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
