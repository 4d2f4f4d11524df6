//! Pooled HTTP transports
//!
//! A transport is a `reqwest::Client` bound to one connection identity. Two
//! fetches may share a transport (one after the other) only if every part of
//! the identity is equal, bin set included.

use crate::fetch::classify::FetchError;
use crate::throttle::LiveToken;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Everything a pooled connection is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub protocol: String,
    pub host: String,
    /// Address the host resolved to; `None` lets the client resolve it
    pub ip: Option<IpAddr>,
    pub port: u16,
    /// Identity of the page credential, if any
    pub credential: Option<String>,
    /// Identity of the certificate trust policy
    pub trust: String,
    /// Proxy URL, if any
    pub proxy: Option<String>,
    /// Sorted, deduplicated bin names
    pub bins: Vec<String>,
}

impl ConnectionKey {
    pub fn new(protocol: &str, host: &str, port: u16, mut bins: Vec<String>) -> Self {
        bins.sort();
        bins.dedup();
        Self {
            protocol: protocol.to_string(),
            host: host.to_lowercase(),
            ip: None,
            port,
            credential: None,
            trust: TRUST_DEFAULT.to_string(),
            proxy: None,
            bins,
        }
    }

    pub fn with_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.ip = ip;
        self
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_trust(mut self, trust_all: bool) -> Self {
        self.trust = if trust_all { TRUST_ALL } else { TRUST_DEFAULT }.to_string();
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

const TRUST_DEFAULT: &str = "default";
const TRUST_ALL: &str = "all";

/// Client settings that do not take part in the identity
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
}

/// A client plus the identity it was built for
#[derive(Debug)]
pub struct PooledTransport {
    key: ConnectionKey,
    client: Client,
    _live: LiveToken,
}

impl PooledTransport {
    /// Builds a client for `key`
    ///
    /// Redirects are never followed: each hop is a separate fetch so that
    /// login sequences can inspect it.
    pub fn open(key: ConnectionKey, settings: &TransportSettings, live: LiveToken) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.connect_timeout)
            .redirect(Policy::none())
            .gzip(true)
            .brotli(true)
            .pool_max_idle_per_host(1)
            .danger_accept_invalid_certs(key.trust == TRUST_ALL);

        if let Some(ip) = key.ip {
            builder = builder.resolve(&key.host, SocketAddr::new(ip, key.port));
        }

        builder = match &key.proxy {
            Some(proxy) => builder.proxy(
                Proxy::all(proxy.as_str()).map_err(|e| FetchError::Io(format!("proxy: {}", e)))?,
            ),
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| FetchError::Io(format!("client setup: {}", e)))?;

        Ok(Self {
            key,
            client,
            _live: live,
        })
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whether this transport can serve a fetch with identity `key`
    pub fn matches(&self, key: &ConnectionKey) -> bool {
        self.key == *key
    }
}
