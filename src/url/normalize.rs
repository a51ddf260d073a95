use serde::Deserialize;
use url::Url;

/// List of tracking query parameters removed when `strip_tracking_params` is on
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// Rules applied when turning a URL into a deduplication fingerprint
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NormalizeOptions {
    /// Keep the original letter case (otherwise the whole URL is lowercased)
    pub case_sensitive: bool,

    /// Drop the query string entirely
    pub ignore_query: bool,

    /// Drop the fragment
    pub ignore_fragment: bool,

    /// Drop a trailing slash from the path
    pub remove_trailing_slash: bool,

    /// Drop `utm_*`, `fbclid` and similar parameters
    pub strip_tracking_params: bool,

    /// Sort the remaining query parameters by key
    pub sort_query_params: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            ignore_query: false,
            ignore_fragment: true,
            remove_trailing_slash: true,
            strip_tracking_params: false,
            sort_query_params: false,
        }
    }
}

/// Normalizes a URL into its fingerprint form
///
/// # Normalization Steps
///
/// 1. Parse the URL (the host is lowercased and dot segments resolved)
/// 2. Collapse repeated slashes in the path
/// 3. Remove the fragment if `ignore_fragment`
/// 4. Remove the query if `ignore_query`, otherwise optionally strip
///    tracking parameters and sort the rest
/// 5. Remove a trailing slash if `remove_trailing_slash`
/// 6. Lowercase everything unless `case_sensitive`
///
/// Input that does not parse as a URL still gets the string-level steps
/// (fragment/query trimming, trailing slash, case), so the function never
/// fails and is idempotent.
///
/// # Examples
///
/// ```
/// use ripple_engine::url::{normalize_url, NormalizeOptions};
///
/// let options = NormalizeOptions::default();
/// assert_eq!(
///     normalize_url("https://Example.com/Page/#top", &options),
///     "https://example.com/page"
/// );
/// ```
pub fn normalize_url(input: &str, options: &NormalizeOptions) -> String {
    let trimmed = input.trim();

    let normalized = match Url::parse(trimmed) {
        Ok(url) => normalize_parsed(url, options),
        Err(_) => normalize_raw(trimmed, options),
    };

    if options.case_sensitive {
        normalized
    } else {
        normalized.to_lowercase()
    }
}

fn normalize_parsed(mut url: Url, options: &NormalizeOptions) -> String {
    if !url.cannot_be_a_base() {
        let path = normalize_path(url.path(), options.remove_trailing_slash);
        url.set_path(&path);
    }

    if options.ignore_fragment {
        url.set_fragment(None);
    }

    if options.ignore_query {
        url.set_query(None);
    } else if url.query().is_some()
        && (options.strip_tracking_params || options.sort_query_params)
    {
        let params = filter_query_params(&url, options);
        if params.is_empty() {
            url.set_query(None);
        } else {
            let query_string = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query_string));
        }
    }

    let mut out = url.to_string();
    // A bare origin serializes as "https://host/"
    if options.remove_trailing_slash && out.ends_with('/') && url.path() == "/" {
        out.pop();
    }
    out
}

fn normalize_raw(input: &str, options: &NormalizeOptions) -> String {
    let mut out = input.to_string();

    if options.ignore_fragment {
        if let Some(pos) = out.find('#') {
            out.truncate(pos);
        }
    }
    if options.ignore_query {
        if let Some(pos) = out.find('?') {
            out.truncate(pos);
        }
    }
    if options.remove_trailing_slash {
        while out.len() > 1 && out.ends_with('/') {
            out.pop();
        }
    }
    out
}

/// Collapses empty and `.`/`..` segments, optionally dropping a trailing slash
fn normalize_path(path: &str, remove_trailing_slash: bool) -> String {
    let trailing = path.len() > 1 && path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if trailing && !remove_trailing_slash {
        result.push('/');
    }
    result
}

fn filter_query_params(url: &Url, options: &NormalizeOptions) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !(options.strip_tracking_params && is_tracking_param(key)))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if options.sort_query_params {
        params.sort_by(|a, b| a.0.cmp(&b.0));
    }
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
