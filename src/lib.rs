//! Sumi-Sluice: a throttled fetch engine with login-sequence navigation
//!
//! This crate fetches web pages under per-destination connection, bandwidth
//! and cadence limits, honoring robots.txt and walking multi-page login
//! sequences before handing documents to the caller.

pub mod config;
pub mod fetch;
pub mod robots;
pub mod session;
pub mod store;
pub mod throttle;

use thiserror::Error;

/// Main error type for Sumi-Sluice operations
#[derive(Debug, Error)]
pub enum SluiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown was requested; never a timeout
    #[error("Fetch interrupted")]
    Interrupted,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias for Sumi-Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use session::{FetchOutcome, ResultSignal, SessionEngine};
pub use store::StoreResult;
