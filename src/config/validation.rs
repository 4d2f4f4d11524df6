use crate::config::types::{
    AccessCredentialEntry, AuthPageKind, Config, FetcherConfig, SessionCredentialEntry,
    ThrottleEntry,
};
use crate::ConfigError;
use regex::Regex;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetcher_config(&config.fetcher)?;
    if let Some(store) = &config.store {
        if store.database_path.is_empty() {
            return Err(ConfigError::Validation(
                "database-path cannot be empty".to_string(),
            ));
        }
    }
    validate_throttles(&config.throttle)?;
    validate_access_credentials(&config.access_credentials)?;
    validate_session_credentials(&config.session_credentials)?;
    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if let Some(from) = &config.from_address {
        validate_email(from)?;
    }

    if config.connect_timeout_ms == 0 || config.socket_timeout_ms == 0 {
        return Err(ConfigError::Validation(format!(
            "timeouts must be positive, got connect={}ms socket={}ms",
            config.connect_timeout_ms, config.socket_timeout_ms
        )));
    }

    if config.global_connection_limit < 1 {
        return Err(ConfigError::Validation(
            "global-connection-limit must be >= 1".to_string(),
        ));
    }

    if config.max_login_hops < 1 {
        return Err(ConfigError::Validation(format!(
            "max-login-hops must be >= 1, got {}",
            config.max_login_hops
        )));
    }

    if config.pool_retry_limit < 1 {
        return Err(ConfigError::Validation(
            "pool-retry-limit must be >= 1".to_string(),
        ));
    }

    if config
        .indexable_content_types
        .iter()
        .any(|t| t.trim().is_empty())
    {
        return Err(ConfigError::Validation(
            "indexable-content-types cannot contain empty entries".to_string(),
        ));
    }

    if let Some(proxy) = &config.proxy_url {
        url::Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy-url '{}': {}", proxy, e)))?;
    }

    Ok(())
}

fn validate_throttles(entries: &[ThrottleEntry]) -> Result<(), ConfigError> {
    for entry in entries {
        validate_regex("bin-regex", &entry.bin_regex)?;

        if let Some(kbps) = entry.max_kb_per_second {
            if !(kbps > 0.0) {
                return Err(ConfigError::Validation(format!(
                    "max-kb-per-second for '{}' must be positive, got {}",
                    entry.bin_regex, kbps
                )));
            }
        }

        if entry.max_fetches_per_minute == Some(0) {
            return Err(ConfigError::Validation(format!(
                "max-fetches-per-minute for '{}' must be positive",
                entry.bin_regex
            )));
        }
    }
    Ok(())
}

fn validate_access_credentials(entries: &[AccessCredentialEntry]) -> Result<(), ConfigError> {
    for entry in entries {
        validate_regex("url-regex", &entry.url_regex)?;
        if entry.username.is_empty() {
            return Err(ConfigError::Validation(format!(
                "access credential for '{}' needs a username",
                entry.url_regex
            )));
        }
    }
    Ok(())
}

fn validate_session_credentials(entries: &[SessionCredentialEntry]) -> Result<(), ConfigError> {
    for entry in entries {
        validate_regex("url-regex", &entry.url_regex)?;

        for page in &entry.auth_pages {
            validate_regex("url-regex", &page.url_regex)?;

            match (&page.match_regex, page.kind) {
                (Some(pattern), _) => validate_regex("match-regex", pattern)?,
                (None, AuthPageKind::Content) => {
                    return Err(ConfigError::Validation(format!(
                        "content auth page '{}' needs a match-regex",
                        page.url_regex
                    )));
                }
                (None, _) => {}
            }

            for parameter in &page.parameters {
                validate_regex("name-regex", &parameter.name_regex)?;
            }
        }
    }
    Ok(())
}

fn validate_regex(field: &str, pattern: &str) -> Result<(), ConfigError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern(format!("{} '{}': {}", field, pattern, e)))
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid from-address: '{}'",
            email
        )));
    }
    Ok(())
}
