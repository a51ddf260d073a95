use url::Url;

/// Extracts the lowercase host of a URL
///
/// Ports are not part of the domain: rate limits and delays apply per host.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_engine::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM:8080/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses `url` and returns its lowercase host
///
/// Returns None when the string is not an absolute URL with a host.
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url).ok().as_ref().and_then(extract_domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_subdomain() {
        let url = Url::parse("https://api.v2.example.com/endpoint").unwrap();
        assert_eq!(extract_domain(&url), Some("api.v2.example.com".to_string()));
    }

    #[test]
    fn test_extract_ignores_port_path_and_query() {
        let url = Url::parse("http://Example.com:8080/path/to?query=value#frag").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_domain_of_string() {
        assert_eq!(
            domain_of("https://Blog.Example.com/x"),
            Some("blog.example.com".to_string())
        );
        assert_eq!(domain_of("http://127.0.0.1:9000/"), Some("127.0.0.1".to_string()));
    }

    #[test]
    fn test_domain_of_rejects_hostless() {
        assert_eq!(domain_of("/relative/path"), None);
        assert_eq!(domain_of("mailto:someone@example.com"), None);
        assert_eq!(domain_of("not a url"), None);
    }
}
