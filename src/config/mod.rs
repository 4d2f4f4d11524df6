//! Configuration module for Sumi-Sluice
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_sluice::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("sluice.toml")).unwrap();
//! println!("Throttle entries: {}", config.throttle.len());
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    AccessCredentialEntry, AccessCredentialKind, AuthPageEntry, AuthPageKind, Config,
    FetcherConfig, ParameterEntry, SessionCredentialEntry, StoreConfig, ThrottleEntry,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
