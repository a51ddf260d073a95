//! Configuration module for Ripple Engine
//!
//! Loads, parses and validates TOML configuration files. Every section is
//! optional, so an empty file yields the default engine.
//!
//! # Example
//!
//! ```no_run
//! use ripple_engine::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("ripple.toml")).unwrap();
//! println!("Seeds: {}", config.seeds.len());
//! ```

mod parser;
mod types;
mod validation;

pub use types::{EngineConfig, FetchConfig, SeedEntry, UserAgentConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub use validation::validate;
