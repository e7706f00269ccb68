use crate::config::types::{Config, SchedulerConfig, ThrottleConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_throttle_config(&config.throttle)?;
    validate_paths(config)?;
    Ok(())
}

/// Validates scheduler tunables
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.fetch_threads < 1 || config.fetch_threads > 500 {
        return Err(ConfigError::Validation(format!(
            "fetch_threads must be between 1 and 500, got {}",
            config.fetch_threads
        )));
    }

    if config.output_threads < 1 || config.output_threads > 100 {
        return Err(ConfigError::Validation(format!(
            "output_threads must be between 1 and 100, got {}",
            config.output_threads
        )));
    }

    if config.server_delay_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "server_delay_ms must be >= 100ms, got {}ms",
            config.server_delay_ms
        )));
    }

    if config.max_requests_per_host < 1 {
        return Err(ConfigError::Validation(format!(
            "max_requests_per_host must be >= 1, got {}",
            config.max_requests_per_host
        )));
    }

    if config.max_queued_requests < 1 {
        return Err(ConfigError::Validation(format!(
            "max_queued_requests must be >= 1, got {}",
            config.max_queued_requests
        )));
    }

    if config.max_per_host_queue < 1 {
        return Err(ConfigError::Validation(format!(
            "max_per_host_queue must be >= 1, got {}",
            config.max_per_host_queue
        )));
    }

    if config.max_output_queue < 1 {
        return Err(ConfigError::Validation(format!(
            "max_output_queue must be >= 1, got {}",
            config.max_output_queue
        )));
    }

    if config.max_hosts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_hosts must be >= 1, got {}",
            config.max_hosts
        )));
    }

    if config.max_redirects_per_url < 1 {
        return Err(ConfigError::Validation(format!(
            "max_redirects_per_url must be >= 1, got {}",
            config.max_redirects_per_url
        )));
    }

    if config.dead_host_failure_rate <= 0.0 || config.dead_host_failure_rate > 1.0 {
        return Err(ConfigError::Validation(format!(
            "dead_host_failure_rate must be in (0.0, 1.0], got {}",
            config.dead_host_failure_rate
        )));
    }

    if config.robots_min_lifetime_secs > config.robots_lifetime_secs {
        return Err(ConfigError::Validation(format!(
            "robots_min_lifetime_secs ({}) exceeds robots_lifetime_secs ({})",
            config.robots_min_lifetime_secs, config.robots_lifetime_secs
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
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

/// Validates throttle configuration
fn validate_throttle_config(config: &ThrottleConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    if config.window_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "throttle window_secs must be >= 1, got {}",
            config.window_secs
        )));
    }

    if config.max_bytes_per_sec < 1 {
        return Err(ConfigError::Validation(format!(
            "throttle max_bytes_per_sec must be >= 1, got {}",
            config.max_bytes_per_sec
        )));
    }

    Ok(())
}

/// Validates that required paths are present
fn validate_paths(config: &Config) -> Result<(), ConfigError> {
    if config.source.fetch_list_path.is_empty() {
        return Err(ConfigError::Validation(
            "fetch_list_path cannot be empty".to_string(),
        ));
    }

    if config.output.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.output.marker_path.is_empty() {
        return Err(ConfigError::Validation(
            "marker_path cannot be empty".to_string(),
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

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
