use crate::config::types::{
    Config, EngineConfig, LoggingConfig, QueueBackend, QueueConfig, RequestConfig,
};
use crate::ConfigError;
use reqwest::header::HeaderValue;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_request_config(&config.request)?;
    validate_engine_config(&config.engine)?;
    validate_queue_config(&config.queue)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validates outbound request configuration
fn validate_request_config(config: &RequestConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 1024 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 1024, got {}",
            config.concurrency
        )));
    }

    if config.timeout == 0 {
        return Err(ConfigError::Validation(
            "timeout must be greater than 0ms".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if HeaderValue::from_str(&config.user_agent).is_err() {
        return Err(ConfigError::Validation(format!(
            "user-agent is not a valid header value: '{}'",
            config.user_agent
        )));
    }

    Ok(())
}

/// Validates scheduling loop configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.idle_interval < 10 {
        return Err(ConfigError::Validation(format!(
            "idle-interval must be >= 10ms, got {}ms",
            config.idle_interval
        )));
    }

    Ok(())
}

/// Validates queue configuration
///
/// Redis settings are only checked when the Redis backend is selected.
fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.backend != QueueBackend::Redis {
        return Ok(());
    }

    let url = Url::parse(&config.redis_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid redis-url: {}", e)))?;

    if !matches!(url.scheme(), "redis" | "rediss" | "redis+unix") {
        return Err(ConfigError::InvalidUrl(format!(
            "redis-url must use a redis:// or rediss:// scheme, got '{}'",
            config.redis_url
        )));
    }

    validate_queue_id(&config.queue_id)
}

/// Queue ids become part of Redis key names and hash tags
fn validate_queue_id(queue_id: &str) -> Result<(), ConfigError> {
    if queue_id.is_empty() {
        return Err(ConfigError::Validation(
            "queue-id cannot be empty".to_string(),
        ));
    }

    if !queue_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::Validation(format!(
            "queue-id must contain only alphanumeric characters, '-', '_' or '.', got '{}'",
            queue_id
        )));
    }

    Ok(())
}

/// Validates logging configuration
fn validate_logging_config(config: &LoggingConfig) -> Result<(), ConfigError> {
    EnvFilter::try_new(&config.level).map_err(|e| {
        ConfigError::Validation(format!("Invalid logging level '{}': {}", config.level, e))
    })?;

    if let Some(path) = &config.file_path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "logging file-path cannot be empty".to_string(),
            ));
        }
        config.open_file()?;
    }
    Ok(())
}
