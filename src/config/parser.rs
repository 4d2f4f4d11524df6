use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
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
/// use sumi_sluice::config::load_config;
///
/// let config = load_config(Path::new("sluice.toml")).unwrap();
/// println!("User agent: {}", config.fetcher.user_agent);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Used to tell whether cached robots and session data were produced under
/// the same throttle and credential settings.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&content)))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::AuthPageKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const FULL_CONFIG: &str = r#"
[fetcher]
user-agent = "SluiceBot/1.0"
from-address = "crawler@example.com"
socket-timeout-ms = 30000
max-login-hops = 8

[store]
database-path = "./sluice.db"

[[throttle]]
bin-regex = "example\\.com$"
max-connections = 4
max-kb-per-second = 64.0

[[throttle]]
bin-regex = ""
max-fetches-per-minute = 120

[[access-credential]]
url-regex = "^https://intranet\\."
type = "basic"
username = "crawler"
password = "secret"

[[session-credential]]
url-regex = "^https?://portal\\.example\\.com/"

[[session-credential.auth-page]]
url-regex = "/login"
kind = "form"
match-regex = "^login$"

[[session-credential.auth-page.parameter]]
name-regex = "^user$"
value = "crawler"

[[session-credential.auth-page]]
url-regex = "/submit"
kind = "redirection"
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(FULL_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.fetcher.user_agent, "SluiceBot/1.0");
        assert_eq!(config.fetcher.socket_timeout_ms, 30000);
        assert_eq!(config.fetcher.connect_timeout_ms, 60000);
        assert_eq!(config.fetcher.max_login_hops, 8);
        assert!(config.fetcher.obey_robots);
        assert_eq!(config.throttle.len(), 2);
        assert_eq!(config.throttle[0].max_connections, Some(4));
        assert_eq!(config.access_credentials.len(), 1);

        let session = &config.session_credentials[0];
        assert_eq!(session.auth_pages.len(), 2);
        assert_eq!(session.auth_pages[0].kind, AuthPageKind::Form);
        assert_eq!(session.auth_pages[0].parameters[0].value, "crawler");
        assert_eq!(session.auth_pages[1].kind, AuthPageKind::Redirection);
        assert!(session.auth_pages[1].match_regex.is_none());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[fetcher]\nuser-agent = \"Bot\"\n").unwrap();
        assert_eq!(config.fetcher.global_connection_limit, 200);
        assert_eq!(config.fetcher.pool_retry_limit, 50);
        assert!(config.store.is_none());
        assert!(config.throttle.is_empty());
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/sluice.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config(
            r#"
[fetcher]
user-agent = "Bot"

[[throttle]]
bin-regex = "(unclosed"
"#,
        );
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::InvalidPattern(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config(FULL_CONFIG);
        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_configs_different_hashes() {
        let file1 = create_temp_config("[fetcher]\nuser-agent = \"A\"\n");
        let file2 = create_temp_config("[fetcher]\nuser-agent = \"B\"\n");

        let (_, hash1) = load_config_with_hash(file1.path()).unwrap();
        let (_, hash2) = load_config_with_hash(file2.path()).unwrap();
        assert_ne!(hash1, hash2);
    }
}
