use crate::config::types::{
    Config, FetcherConfig, ScheduleConfig, SourceConfig, StorageConfig, UserAgentConfig,
};
use crate::ingest::Cadence;
use crate::ConfigError;
use std::collections::HashSet;
use std::net::SocketAddr;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetcher_config(&config.fetcher)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_schedule_config(&config.schedule)?;
    validate_storage_config(&config.storage)?;
    validate_sources(&config.sources)?;

    config.server.bind_address.parse::<SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!(
            "bind-address '{}' is not a socket address: {}",
            config.server.bind_address, e
        ))
    })?;

    Ok(())
}

/// Validates request pacing and retry settings
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.request_spacing_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "request-spacing-ms must be >= 100ms, got {}ms",
            config.request_spacing_ms
        )));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    if config.max_backoff_ms < config.retry_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "max-backoff-ms ({}) must not be smaller than retry-backoff-ms ({})",
            config.max_backoff_ms, config.retry_backoff_ms
        )));
    }

    if config.request_timeout_secs == 0 || config.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs and connect-timeout-secs must be positive".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    if config.interval_hours.is_some() && config.daily_at.is_some() {
        return Err(ConfigError::Validation(
            "schedule accepts either interval-hours or daily-at, not both".to_string(),
        ));
    }

    Cadence::from_config(config)?;
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.export_dir.is_empty() {
        return Err(ConfigError::Validation(
            "export-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the ordered source list
fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    if sources.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[source]] must be configured".to_string(),
        ));
    }

    let mut names = HashSet::new();
    let mut urls = HashSet::new();

    for source in sources {
        if source.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source name cannot be empty".to_string(),
            ));
        }

        let url = Url::parse(&source.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid source URL '{}': {}", source.url, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Source URL '{}' must use HTTP or HTTPS",
                source.url
            )));
        }

        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }

        if !urls.insert(url.as_str().to_string()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source URL '{}'",
                source.url
            )));
        }
    }

    Ok(())
}

/// Basic email shape check
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "contact-email '{}' is missing '@'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "contact-email '{}' is not a valid address",
            email
        )));
    }

    Ok(())
}
