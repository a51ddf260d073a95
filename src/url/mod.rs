//! URL handling for the engine
//!
//! This module provides domain extraction (the key for per-domain policy
//! state), wildcard matching for per-domain overrides, and the URL
//! normalization used to fingerprint tasks for duplicate filtering.

mod domain;
mod matcher;
mod normalize;

pub use domain::{domain_of, extract_domain};
pub use matcher::{lookup_override, matches_wildcard};
pub use normalize::{normalize_url, NormalizeOptions};
