//! HTML parsing, field extraction and link following
//!
//! A task may carry two JSON rules that only this module interprets:
//!
//! * **extract**: `{ "field": "css selector", ... }`. A field may also be
//!   `{ "selector": "...", "attr": "href", "all": true }` to read an
//!   attribute or collect every match.
//! * **follow**: `{ "selector": "a.next", "max-depth": 2, "same-domain": true }`.
//!   Every key is optional; the selector defaults to all links on the page.
//!
//! `scraper` documents are not `Send`, so everything here is synchronous and
//! returns owned data.

use crate::task::{Response, Task, META_DEPTH};
use crate::url::extract_domain;
use crate::UrlError;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use url::Url;

const LINK_SELECTOR: &str = "a[href]";

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from the `<title>` tag)
    pub title: Option<String>,

    /// Every link found on the page, absolute and de-duplicated
    pub links: Vec<String>,

    /// Fields produced by the task's extraction rule
    pub data: Option<Value>,

    /// Child tasks produced by the task's follow rule
    pub follow_ups: Vec<Task>,
}

impl ParsedPage {
    /// JSON form handed to `on_parse` hooks
    pub fn to_value(&self) -> Value {
        let mut value = Map::new();
        value.insert("title".to_string(), json!(self.title));
        value.insert("links".to_string(), json!(self.links));
        if let Some(data) = &self.data {
            value.insert("data".to_string(), data.clone());
        }
        Value::Object(value)
    }
}

/// Follow rule of a task, with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowRule {
    pub selector: Option<String>,
    pub max_depth: u32,
    pub same_domain: bool,
}

impl FollowRule {
    /// Reads a follow rule from its JSON form
    pub fn from_value(value: &Value) -> Self {
        Self {
            selector: value
                .get("selector")
                .and_then(Value::as_str)
                .map(str::to_string),
            max_depth: value
                .get("max-depth")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32,
            same_domain: value
                .get("same-domain")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        }
    }
}

/// Parses a fetched page for a task
///
/// # Arguments
///
/// * `task` - The task that fetched the page; supplies the rules
/// * `response` - The fetched response; its final URL is the link base
///
/// # Returns
///
/// * `Ok(ParsedPage)` - Successfully parsed page
/// * `Err(UrlError)` - Neither the response nor the task URL parses
pub fn parse_page(task: &Task, response: &Response) -> Result<ParsedPage, UrlError> {
    let base_url = Url::parse(&response.url)
        .or_else(|_| Url::parse(&task.url))
        .map_err(|e| UrlError::Parse(format!("{}: {}", task.url, e)))?;

    let document = Html::parse_document(&response.body);

    let title = extract_title(&document);
    let links = extract_links(&document, &base_url, LINK_SELECTOR);
    let data = task
        .extract
        .as_ref()
        .map(|rule| extract_fields(&document, rule));
    let follow_ups = match &task.follow {
        Some(rule) => follow_links(task, &document, &base_url, &FollowRule::from_value(rule)),
        None => Vec::new(),
    };

    Ok(ParsedPage {
        title,
        links,
        data,
        follow_ups,
    })
}

/// Parses bare HTML into title and links
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url, LINK_SELECTOR),
        ..ParsedPage::default()
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element_text(&element))
        .filter(|s| !s.is_empty())
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collects resolved links from elements matching `selector`
///
/// With the default selector, `rel="canonical"` links are included too.
fn extract_links(document: &Html, base_url: &Url, selector: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let Ok(parsed) = Selector::parse(selector) else {
        tracing::warn!(selector, "Invalid link selector");
        return links;
    };

    let mut candidates: Vec<&str> = document
        .select(&parsed)
        .filter(|element| element.value().attr("download").is_none())
        .filter_map(|element| element.value().attr("href"))
        .collect();

    if selector == LINK_SELECTOR {
        if let Ok(canonical) = Selector::parse("link[rel='canonical'][href]") {
            candidates.extend(
                document
                    .select(&canonical)
                    .filter_map(|element| element.value().attr("href")),
            );
        }
    }

    for href in candidates {
        if let Some(url) = resolve_link(href, base_url) {
            if seen.insert(url.clone()) {
                links.push(url);
            }
        }
    }
    links
}

/// Resolves an href against the page URL
///
/// Skips `javascript:`, `mailto:`, `tel:` and `data:` links, fragment-only
/// anchors, and anything that is not HTTP(S) after resolution. The fragment
/// of a resolved link is dropped.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute.to_string())
}

/// Applies an extraction rule
///
/// Fields whose selector matches nothing (or does not parse) yield `null`.
fn extract_fields(document: &Html, rule: &Value) -> Value {
    let Some(fields) = rule.as_object() else {
        tracing::warn!("Extraction rule is not an object, ignoring");
        return Value::Null;
    };

    let mut data = Map::new();
    for (field, spec) in fields {
        let (selector, attr, all) = match spec {
            Value::String(selector) => (selector.as_str(), None, false),
            Value::Object(options) => (
                options.get("selector").and_then(Value::as_str).unwrap_or(""),
                options.get("attr").and_then(Value::as_str),
                options.get("all").and_then(Value::as_bool).unwrap_or(false),
            ),
            _ => ("", None, false),
        };

        let value = match Selector::parse(selector) {
            Ok(parsed) => {
                let mut values = document.select(&parsed).filter_map(|element| match attr {
                    Some(name) => element.value().attr(name).map(str::to_string),
                    None => Some(element_text(&element)),
                });
                if all {
                    json!(values.collect::<Vec<_>>())
                } else {
                    values.next().map(Value::String).unwrap_or(Value::Null)
                }
            }
            Err(_) => {
                tracing::warn!(field = %field, selector, "Invalid extraction selector");
                Value::Null
            }
        };
        data.insert(field.clone(), value);
    }
    Value::Object(data)
}

/// Builds child tasks one level deeper than `task`
///
/// Children inherit the rules, timeout, retry budget and result callback of
/// their parent, at one priority level lower.
fn follow_links(task: &Task, document: &Html, base_url: &Url, rule: &FollowRule) -> Vec<Task> {
    let depth = task.depth();
    if depth >= rule.max_depth {
        return Vec::new();
    }

    let selector = rule.selector.as_deref().unwrap_or(LINK_SELECTOR);
    let origin = extract_domain(base_url);

    extract_links(document, base_url, selector)
        .into_iter()
        .filter(|link| {
            !rule.same_domain
                || Url::parse(link).ok().and_then(|u| extract_domain(&u)) == origin
        })
        .map(|link| {
            let mut child = Task::new(link)
                .with_priority(task.priority.saturating_sub(1))
                .with_retries(task.retries)
                .with_metadata(META_DEPTH, json!(depth + 1));
            child.timeout = task.timeout;
            child.extract = task.extract.clone();
            child.follow = task.follow.clone();
            child.on_result = task.on_result.clone();
            child
        })
        .collect()
}
