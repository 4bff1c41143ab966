use crate::config::types::{
    Config, RequestDefaults, StoreConfig, StreamConfig, UserAgentConfig, WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_worker_config(&config.worker)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_request_defaults(&config.requests)?;
    validate_stream_config(&config.stream)?;
    validate_store_config(&config.store)?;
    Ok(())
}

/// Validates worker configuration
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 1000 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 1000, got {}",
            config.concurrency
        )));
    }

    if config.domain_concurrency < 1 || config.domain_concurrency > config.concurrency {
        return Err(ConfigError::Validation(format!(
            "domain_concurrency must be between 1 and concurrency ({}), got {}",
            config.concurrency, config.domain_concurrency
        )));
    }

    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.robots_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "robots_timeout_ms must be > 0".to_string(),
        ));
    }

    if config.robots_ttl_secs == Some(0) {
        return Err(ConfigError::Validation(
            "robots_ttl_secs must be > 0 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_request_defaults(config: &RequestDefaults) -> Result<(), ConfigError> {
    if config.timeout_ms == 0 {
        return Err(ConfigError::Validation("timeout_ms must be > 0".to_string()));
    }
    if config.max_bytes == 0 {
        return Err(ConfigError::Validation("max_bytes must be > 0".to_string()));
    }
    Ok(())
}

/// Validates stream configuration
fn validate_stream_config(config: &StreamConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "stream database_path cannot be empty".to_string(),
        ));
    }

    if config.partitions < 1 || config.partitions > 256 {
        return Err(ConfigError::Validation(format!(
            "partitions must be between 1 and 256, got {}",
            config.partitions
        )));
    }

    for (name, value) in [
        ("requests_topic", &config.requests_topic),
        ("results_topic", &config.results_topic),
        ("worker_group", &config.worker_group),
        ("sink_group", &config.sink_group),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    if config.requests_topic == config.results_topic {
        return Err(ConfigError::Validation(format!(
            "requests_topic and results_topic must differ, both are '{}'",
            config.requests_topic
        )));
    }

    if config.sink_batch_size < 1 {
        return Err(ConfigError::Validation(
            "sink_batch_size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates store configuration
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "store database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
