//! Configuration module for Ripple-Crawl
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every option has a default, so an empty file is a valid configuration.
//!
//! # Example
//!
//! ```no_run
//! use ripple_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Request timeout: {:?}", config.request.timeout());
//! ```

mod parser;
mod types;
mod validation;

pub use parser::{
    compute_config_hash, dump_config, hash_config, load_config, load_config_with_hash,
    parse_config,
};
pub use types::{Config, EngineConfig, LoggingConfig, QueueBackend, QueueConfig, RequestConfig};
pub use validation::validate;
