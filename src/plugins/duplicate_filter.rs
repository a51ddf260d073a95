//! URL de-duplication
//!
//! Every new task's URL is normalized into a fingerprint. A task whose
//! fingerprint was already seen is rejected from `on_task_create`. The
//! fingerprint cache is bounded; when it overflows, the oldest tenth of the
//! entries is evicted.

use crate::pipeline::{Plugin, PluginInfo, TaskHooks};
use crate::task::Task;
use crate::url::{normalize_url, NormalizeOptions};
use crate::PluginError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DUPLICATE_FILTER: &str = "duplicate-filter";

/// Custom URL normalizer
pub type Normalizer = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Duplicate filter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DuplicateFilterConfig {
    pub enabled: bool,

    #[serde(flatten)]
    pub normalize: NormalizeOptions,

    /// Maximum number of fingerprints kept
    pub max_cache_size: usize,
}

impl Default for DuplicateFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            normalize: NormalizeOptions::default(),
            max_cache_size: 100_000,
        }
    }
}

/// A remembered URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub normalized: String,
    /// The URL as first submitted
    pub original: String,
    pub first_seen: DateTime<Utc>,
    /// How many times the URL was submitted
    pub count: u64,
}

#[derive(Default)]
struct FingerprintCache {
    entries: HashMap<String, Fingerprint>,
    // insertion order, oldest first
    order: VecDeque<String>,
}

impl FingerprintCache {
    /// Inserts or bumps a fingerprint; returns true if it was new
    fn observe(&mut self, normalized: String, original: &str) -> bool {
        if let Some(entry) = self.entries.get_mut(&normalized) {
            entry.count += 1;
            return false;
        }
        self.order.push_back(normalized.clone());
        self.entries.insert(
            normalized.clone(),
            Fingerprint {
                normalized,
                original: original.to_string(),
                first_seen: Utc::now(),
                count: 1,
            },
        );
        true
    }

    fn evict_overflow(&mut self, max: usize) -> usize {
        if self.entries.len() <= max {
            return 0;
        }
        let count = (max / 10).max(1).min(self.order.len());
        for key in self.order.drain(..count) {
            self.entries.remove(&key);
        }
        count
    }

    fn remove(&mut self, normalized: &str) -> bool {
        if self.entries.remove(normalized).is_none() {
            return false;
        }
        self.order.retain(|key| key != normalized);
        true
    }
}

pub struct DuplicateFilter {
    config: DuplicateFilterConfig,
    normalizer: Option<Normalizer>,
    cache: Mutex<FingerprintCache>,
}

impl DuplicateFilter {
    pub fn new(config: DuplicateFilterConfig) -> Self {
        Self {
            config,
            normalizer: None,
            cache: Mutex::new(FingerprintCache::default()),
        }
    }

    /// Uses `normalizer` instead of the configured normalization rules
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    fn lock_cache(&self) -> MutexGuard<'_, FingerprintCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fingerprint key of a URL
    pub fn normalize(&self, url: &str) -> String {
        match &self.normalizer {
            Some(normalizer) => normalizer(url),
            None => normalize_url(url, &self.config.normalize),
        }
    }

    /// Whether a URL (or an equivalent one) was seen
    pub fn has_seen(&self, url: &str) -> bool {
        let key = self.normalize(url);
        self.lock_cache().entries.contains_key(&key)
    }

    /// Records a URL as seen
    pub fn mark_as_seen(&self, url: &str) {
        self.check_and_mark(url);
    }

    /// Records a URL, returning true if it had not been seen before
    pub fn check_and_mark(&self, url: &str) -> bool {
        let key = self.normalize(url);
        let mut cache = self.lock_cache();
        let fresh = cache.observe(key, url);
        if fresh {
            let evicted = cache.evict_overflow(self.config.max_cache_size);
            if evicted > 0 {
                tracing::debug!(evicted, "Fingerprint cache full, evicted oldest entries");
            }
        }
        fresh
    }

    pub fn fingerprint(&self, url: &str) -> Option<Fingerprint> {
        let key = self.normalize(url);
        self.lock_cache().entries.get(&key).cloned()
    }

    /// Drops a URL's fingerprint so it can be submitted again
    ///
    /// # Returns
    ///
    /// True if the URL (or an equivalent one) had been seen
    pub fn forget(&self, url: &str) -> bool {
        let key = self.normalize(url);
        self.lock_cache().remove(&key)
    }

    pub fn len(&self) -> usize {
        self.lock_cache().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut cache = self.lock_cache();
        cache.entries.clear();
        cache.order.clear();
    }
}

impl Plugin for DuplicateFilter {
    fn info(&self) -> PluginInfo {
        PluginInfo::new(DUPLICATE_FILTER, env!("CARGO_PKG_VERSION")).with_priority(100)
    }

    fn task_hooks(&self) -> Option<&dyn TaskHooks> {
        Some(self)
    }
}

#[async_trait]
impl TaskHooks for DuplicateFilter {
    async fn on_task_create(&self, task: &Task) -> Result<Option<Task>, PluginError> {
        if self.check_and_mark(&task.url) {
            return Ok(None);
        }
        tracing::debug!(url = %task.url, "Duplicate URL rejected");
        Err(PluginError::Duplicate {
            url: task.url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_filter() -> DuplicateFilter {
        DuplicateFilter::new(DuplicateFilterConfig::default())
    }

    #[test]
    fn test_equivalent_urls_are_seen() {
        let filter = create_test_filter();
        filter.mark_as_seen("https://Example.com/Path/");

        for variant in [
            "https://example.com/path",
            "HTTPS://EXAMPLE.COM/PATH/",
            "https://example.com/path#section",
        ] {
            assert!(filter.has_seen(&filter.normalize(variant)), "{}", variant);
            assert!(filter.has_seen(variant), "{}", variant);
        }
        assert!(!filter.has_seen("https://example.com/other"));
    }

    #[test]
    fn test_query_matters_unless_ignored() {
        let filter = create_test_filter();
        filter.mark_as_seen("https://example.com/search?q=1");
        assert!(!filter.has_seen("https://example.com/search?q=2"));

        let mut config = DuplicateFilterConfig::default();
        config.normalize.ignore_query = true;
        let filter = DuplicateFilter::new(config);
        filter.mark_as_seen("https://example.com/search?q=1");
        assert!(filter.has_seen("https://example.com/search?q=2"));
    }

    #[test]
    fn test_custom_normalizer() {
        let filter = create_test_filter()
            .with_normalizer(Arc::new(|url: &str| url.split('?').next().unwrap_or(url).to_string()));

        filter.mark_as_seen("https://example.com/a?x=1");
        assert!(filter.has_seen("https://example.com/a?y=2"));
        // Case is kept by this normalizer
        assert!(!filter.has_seen("https://example.com/A"));
    }

    #[test]
    fn test_fingerprint_counts_submissions() {
        let filter = create_test_filter();
        assert!(filter.check_and_mark("https://example.com/"));
        assert!(!filter.check_and_mark("https://example.com"));
        assert!(!filter.check_and_mark("https://EXAMPLE.com/"));

        let fingerprint = filter.fingerprint("https://example.com/").unwrap();
        assert_eq!(fingerprint.count, 3);
        assert_eq!(fingerprint.original, "https://example.com/");
    }

    #[test]
    fn test_forget_allows_resubmission() {
        let filter = create_test_filter();
        filter.mark_as_seen("https://example.com/a");
        filter.mark_as_seen("https://example.com/b");

        assert!(filter.forget("https://EXAMPLE.com/a/"));
        assert!(!filter.has_seen("https://example.com/a"));
        assert!(!filter.forget("https://example.com/a"));
        assert_eq!(filter.len(), 1);

        assert!(filter.check_and_mark("https://example.com/a"));
        assert!(filter.has_seen("https://example.com/b"));
    }

    #[test]
    fn test_eviction_drops_oldest_tenth() {
        let filter = DuplicateFilter::new(DuplicateFilterConfig {
            max_cache_size: 20,
            ..DuplicateFilterConfig::default()
        });

        for i in 0..21 {
            filter.mark_as_seen(&format!("https://example.com/{}", i));
        }

        assert_eq!(filter.len(), 19);
        assert!(!filter.has_seen("https://example.com/0"));
        assert!(!filter.has_seen("https://example.com/1"));
        assert!(filter.has_seen("https://example.com/2"));
        assert!(filter.has_seen("https://example.com/20"));
    }

    #[test]
    fn test_tiny_cache_evicts_at_least_one() {
        let filter = DuplicateFilter::new(DuplicateFilterConfig {
            max_cache_size: 3,
            ..DuplicateFilterConfig::default()
        });
        for i in 0..4 {
            filter.mark_as_seen(&format!("https://example.com/{}", i));
        }

        assert_eq!(filter.len(), 3);
        assert!(!filter.has_seen("https://example.com/0"));
    }

    #[tokio::test]
    async fn test_on_task_create_rejects_duplicates() {
        let filter = create_test_filter();
        let task = Task::new("https://example.com/page");

        assert!(filter.on_task_create(&task).await.unwrap().is_none());

        let err = filter
            .on_task_create(&Task::new("https://example.com/page/"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PluginError::Duplicate {
                url: "https://example.com/page/".to_string()
            }
        );
    }

    #[test]
    fn test_config_from_toml() {
        let config: DuplicateFilterConfig = toml::from_str(
            r#"
            ignore-query = true
            max-cache-size = 50
            "#,
        )
        .unwrap();

        assert!(config.enabled);
        assert!(config.normalize.ignore_query);
        assert!(config.normalize.ignore_fragment);
        assert_eq!(config.max_cache_size, 50);
    }
}
