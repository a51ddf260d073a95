use std::collections::HashMap;

/// Checks if a domain matches a wildcard pattern
///
/// This function supports two types of patterns:
/// 1. Exact match: "example.com" matches only "example.com"
/// 2. Wildcard match: "*.example.com" matches:
///    - "example.com" (the bare domain)
///    - "blog.example.com" (single subdomain)
///    - "api.v2.example.com" (nested subdomains)
///
/// # Examples
///
/// ```
/// use ripple_engine::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(!matches_wildcard("example.com", "other.com"));
///
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "example.org"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern
    }
}

/// Finds the per-domain override that applies to `domain`
///
/// An exact key wins. Otherwise the most specific (longest) matching
/// wildcard pattern is used.
pub fn lookup_override<'a, V>(overrides: &'a HashMap<String, V>, domain: &str) -> Option<&'a V> {
    if let Some(value) = overrides.get(domain) {
        return Some(value);
    }

    overrides
        .iter()
        .filter(|(pattern, _)| pattern.starts_with("*.") && matches_wildcard(pattern, domain))
        .max_by_key(|(pattern, _)| pattern.len())
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_wildcard("example.com", "example.com"));
        assert!(matches_wildcard("blog.example.com", "blog.example.com"));
    }

    #[test]
    fn test_exact_no_match() {
        assert!(!matches_wildcard("example.com", "other.com"));
        assert!(!matches_wildcard("example.com", "blog.example.com"));
        assert!(!matches_wildcard("blog.example.com", "example.com"));
    }

    #[test]
    fn test_wildcard_matches_subdomains() {
        assert!(matches_wildcard("*.example.com", "example.com"));
        assert!(matches_wildcard("*.example.com", "blog.example.com"));
        assert!(matches_wildcard("*.example.com", "a.b.example.com"));
    }

    #[test]
    fn test_wildcard_rejects_suffix_lookalike() {
        assert!(!matches_wildcard("*.example.com", "notexample.com"));
        assert!(!matches_wildcard("*.example.com", "example.com.evil.org"));
    }

    #[test]
    fn test_lookup_prefers_exact() {
        let mut overrides = HashMap::new();
        overrides.insert("*.example.com".to_string(), 1);
        overrides.insert("api.example.com".to_string(), 2);

        assert_eq!(lookup_override(&overrides, "api.example.com"), Some(&2));
        assert_eq!(lookup_override(&overrides, "www.example.com"), Some(&1));
        assert_eq!(lookup_override(&overrides, "other.org"), None);
    }

    #[test]
    fn test_lookup_prefers_longest_wildcard() {
        let mut overrides = HashMap::new();
        overrides.insert("*.example.com".to_string(), 1);
        overrides.insert("*.api.example.com".to_string(), 2);

        assert_eq!(lookup_override(&overrides, "v2.api.example.com"), Some(&2));
        assert_eq!(lookup_override(&overrides, "blog.example.com"), Some(&1));
    }
}
