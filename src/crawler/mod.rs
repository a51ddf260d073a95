//! Crawler module: the engine that drives the scheduler and the pipeline
//!
//! - [`Engine`]: task submission, the per-task hook sequence, retries
//! - [`HttpFetcher`]: reqwest-backed [`PageFetcher`]
//! - [`parse_page`]: title, links, extraction and follow rules

mod engine;
mod fetcher;
mod parser;

pub use engine::{CrawlSummary, Engine};
pub use fetcher::{HttpFetcher, PageFetcher};
pub use parser::{parse_html, parse_page, FollowRule, ParsedPage};
