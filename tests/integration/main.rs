//! Integration tests for the fetch engine
//!
//! These tests use wiremock to stand up mock sites and drive whole document
//! fetches through the engine: robots.txt, throttled connections and login
//! sequence walks.

mod fetch_tests;
mod login_tests;

use std::sync::Arc;
use sumi_sluice::config::parse_config;
use sumi_sluice::store::{MemoryActivityLog, MemoryEventGate, Stores};
use sumi_sluice::SessionEngine;
use wiremock::MockServer;

/// Everything a test needs to inspect after a fetch
pub struct Harness {
    pub engine: SessionEngine,
    pub stores: Stores,
    pub gate: Arc<MemoryEventGate>,
    pub log: Arc<MemoryActivityLog>,
}

/// Builds an engine from TOML where `{uri}` stands for the mock server's URI
pub fn harness(server: &MockServer, toml: &str) -> Harness {
    harness_at(&server.uri(), toml)
}

/// Builds an engine from TOML where `{uri}` stands for `uri`
pub fn harness_at(uri: &str, toml: &str) -> Harness {
    let config = parse_config(&toml.replace("{uri}", uri)).unwrap();
    let stores = Stores::in_memory();
    let gate = Arc::new(MemoryEventGate::new());
    let log = Arc::new(MemoryActivityLog::new());
    let engine = SessionEngine::new(&config, stores.clone(), gate.clone(), log.clone()).unwrap();

    Harness {
        engine,
        stores,
        gate,
        log,
    }
}

/// The document URL for `path` on the mock server
pub fn url(server: &MockServer, path: &str) -> String {
    format!("{}{}", server.uri(), path)
}
