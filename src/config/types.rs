use crate::plugins::{DelayConfig, DuplicateFilterConfig, RateLimitConfig, RetryConfig};
use crate::scheduler::SchedulerConfig;
use crate::task::Task;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Main configuration structure for Ripple Engine
///
/// Every section is optional; missing sections take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,

    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,

    pub retry: RetryConfig,

    pub delay: DelayConfig,

    #[serde(rename = "duplicate-filter")]
    pub duplicate_filter: DuplicateFilterConfig,

    pub fetch: FetchConfig,

    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,

    pub seeds: Vec<SeedEntry>,
}

/// HTTP fetch settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetchConfig {
    /// Request timeout in milliseconds, unless the task sets its own
    pub timeout: u64,

    /// Maximum redirects followed per request
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: 30_000,
            max_redirects: 10,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "ripple".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: String::new(),
            contact_email: String::new(),
        }
    }
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// `name/version (+contact-url; contact-email)`, with the contact part
    /// left out when neither contact is configured.
    pub fn header_value(&self) -> String {
        let contacts: Vec<&str> = [self.contact_url.as_str(), self.contact_email.as_str()]
            .into_iter()
            .filter(|c| !c.is_empty())
            .collect();

        if contacts.is_empty() {
            format!("{}/{}", self.crawler_name, self.crawler_version)
        } else {
            let mut contact = contacts.join("; ");
            if !self.contact_url.is_empty() {
                contact.insert(0, '+');
            }
            format!("{}/{} ({})", self.crawler_name, self.crawler_version, contact)
        }
    }
}

/// A seed URL to start crawling from
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SeedEntry {
    pub url: String,

    #[serde(default)]
    pub priority: i32,

    /// How many link hops to follow from this seed (0 = only the seed)
    #[serde(default)]
    pub max_depth: u32,

    /// Only follow links on the seed's host
    #[serde(default = "default_same_domain")]
    pub same_domain: bool,

    /// CSS selector of the links to follow; defaults to every `a[href]`
    #[serde(default)]
    pub selector: Option<String>,

    /// Extraction rule: field name to CSS selector
    #[serde(default)]
    pub extract: HashMap<String, String>,
}

fn default_same_domain() -> bool {
    true
}

impl SeedEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: 0,
            max_depth: 0,
            same_domain: true,
            selector: None,
            extract: HashMap::new(),
        }
    }

    /// Builds the root task for this seed
    pub fn to_task(&self) -> Task {
        let mut task = Task::new(self.url.clone()).with_priority(self.priority);

        if self.max_depth > 0 {
            let mut rule = Map::new();
            if let Some(selector) = &self.selector {
                rule.insert("selector".to_string(), json!(selector));
            }
            rule.insert("max-depth".to_string(), json!(self.max_depth));
            rule.insert("same-domain".to_string(), json!(self.same_domain));
            task = task.with_follow(Value::Object(rule));
        }

        if !self.extract.is_empty() {
            task = task.with_extract(json!(self.extract));
        }
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();

        assert_eq!(config.scheduler.concurrency, 5);
        assert_eq!(config.scheduler.resource_limits.max_queue_size, 1000);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.delay.default_delay, 1000);
        assert!(config.duplicate_filter.normalize.remove_trailing_slash);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(30));
        assert_eq!(config.user_agent.crawler_name, "ripple");
        assert!(config.seeds.is_empty());
    }

    #[test]
    fn test_sections_parse() {
        let config: EngineConfig = toml::from_str(
            r#"
[scheduler]
concurrency = 8
poll-interval = 5

[scheduler.resource-limits]
max-active-connections = 16

[rate-limit]
capacity = 10
refill-rate = 4.5

[rate-limit.per-domain]
capacity = 2
refill-rate = 1

[rate-limit.domains."*.example.org"]
capacity = 1
refill-rate = 0.5

[delay]
default-delay = 250
randomize = true

[delay.domains]
"slow.example.com" = 2000

[[seeds]]
url = "https://example.com/"
priority = 4
max-depth = 2

[seeds.extract]
title = "h1"
"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.concurrency, 8);
        assert_eq!(config.scheduler.poll_interval, 5);
        assert_eq!(config.scheduler.resource_limits.max_active_connections, 16);
        assert_eq!(config.rate_limit.capacity, 10);
        assert_eq!(config.rate_limit.per_domain.refill_rate, 1.0);
        assert_eq!(config.rate_limit.domains["*.example.org"].capacity, 1);
        assert!(config.delay.randomize);
        assert_eq!(config.delay.domains["slow.example.com"], 2000);
        assert_eq!(config.seeds[0].priority, 4);
        assert!(config.seeds[0].same_domain);
        assert_eq!(config.seeds[0].extract["title"], "h1");
    }

    #[test]
    fn test_seed_to_task() {
        let mut seed = SeedEntry::new("https://example.com/");
        seed.priority = 2;
        seed.max_depth = 3;
        seed.extract.insert("title".to_string(), "h1".to_string());

        let task = seed.to_task();
        assert_eq!(task.priority, 2);
        assert_eq!(task.depth(), 0);

        let follow = task.follow.unwrap();
        assert_eq!(follow["max-depth"], 3);
        assert_eq!(follow["same-domain"], true);
        assert!(follow.get("selector").is_none());
        assert_eq!(task.extract.unwrap()["title"], "h1");
    }

    #[test]
    fn test_seed_without_depth_has_no_follow_rule() {
        assert!(SeedEntry::new("https://example.com/").to_task().follow.is_none());
    }

    #[test]
    fn test_user_agent_header() {
        let mut ua = UserAgentConfig::default();
        assert_eq!(ua.header_value(), format!("ripple/{}", env!("CARGO_PKG_VERSION")));

        ua.crawler_version = "1.0".to_string();
        ua.contact_url = "https://example.com/bot".to_string();
        ua.contact_email = "bot@example.com".to_string();
        assert_eq!(
            ua.header_value(),
            "ripple/1.0 (+https://example.com/bot; bot@example.com)"
        );
    }
}
