use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Missing sections and fields take their default values.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use ripple_crawl::config::load_config;
///
/// let config = load_config(Path::new("crawl.toml")).unwrap();
/// println!("Concurrency: {}", config.request.concurrency);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Renders a configuration as TOML
///
/// `Config::default()` rendered this way is a complete template of every
/// supported option.
pub fn dump_config(config: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Hex-encoded SHA-256 digest of configuration text
///
/// Logged at startup so runs can be matched to the configuration they used.
pub fn hash_config(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Hashes the configuration file at `path`; see [`hash_config`]
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    Ok(hash_config(&std::fs::read_to_string(path)?))
}

/// Loads a configuration and the hash of the exact text it was parsed from
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hash_config(&content)))
}
