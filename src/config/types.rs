use serde::Deserialize;

/// Main configuration structure for Sumi-Sluice
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fetcher: FetcherConfig,

    #[serde(default)]
    pub store: Option<StoreConfig>,

    #[serde(default)]
    pub throttle: Vec<ThrottleEntry>,

    #[serde(default, rename = "access-credential")]
    pub access_credentials: Vec<AccessCredentialEntry>,

    #[serde(default, rename = "session-credential")]
    pub session_credentials: Vec<SessionCredentialEntry>,
}

/// Fetch behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// User-Agent header sent with every request, also used for robots.txt matching
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Contact address sent in the From header
    #[serde(rename = "from-address", default)]
    pub from_address: Option<String>,

    /// Time allowed to establish a connection (milliseconds)
    #[serde(rename = "connect-timeout-ms", default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Time allowed between socket events (milliseconds)
    #[serde(rename = "socket-timeout-ms", default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Maximum live connections across all bins
    #[serde(
        rename = "global-connection-limit",
        default = "default_global_connection_limit"
    )]
    pub global_connection_limit: usize,

    /// Maximum pages walked in one login sequence before giving up
    #[serde(rename = "max-login-hops", default = "default_max_login_hops")]
    pub max_login_hops: u32,

    /// Attempts to obtain a pooled connection before reporting contention
    #[serde(rename = "pool-retry-limit", default = "default_pool_retry_limit")]
    pub pool_retry_limit: u32,

    /// Whether robots.txt is consulted at all
    #[serde(rename = "obey-robots", default = "default_true")]
    pub obey_robots: bool,

    /// MIME types a 200 response must have to be handed on; empty accepts all
    #[serde(rename = "indexable-content-types", default)]
    pub indexable_content_types: Vec<String>,

    /// Proxy every request goes through
    #[serde(rename = "proxy-url", default)]
    pub proxy_url: Option<String>,

    /// Accept any server certificate
    #[serde(rename = "trust-all-certificates", default)]
    pub trust_all_certificates: bool,
}

fn default_connect_timeout_ms() -> u64 {
    60_000
}

fn default_socket_timeout_ms() -> u64 {
    300_000
}

fn default_global_connection_limit() -> usize {
    200
}

fn default_max_login_hops() -> u32 {
    16
}

fn default_pool_retry_limit() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

impl FetcherConfig {
    /// Configuration with every optional field at its default
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            from_address: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            global_connection_limit: default_global_connection_limit(),
            max_login_hops: default_max_login_hops(),
            pool_retry_limit: default_pool_retry_limit(),
            obey_robots: true,
            indexable_content_types: Vec::new(),
            proxy_url: None,
            trust_all_certificates: false,
        }
    }
}

/// Persistent store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Limits for every bin whose name matches `bin-regex`
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleEntry {
    #[serde(rename = "bin-regex")]
    pub bin_regex: String,

    #[serde(rename = "case-insensitive", default)]
    pub case_insensitive: bool,

    #[serde(rename = "max-connections", default)]
    pub max_connections: Option<u32>,

    #[serde(rename = "max-kb-per-second", default)]
    pub max_kb_per_second: Option<f64>,

    #[serde(rename = "max-fetches-per-minute", default)]
    pub max_fetches_per_minute: Option<u32>,
}

/// Kind of page-level credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessCredentialKind {
    Basic,
}

/// Credential attached to every request whose URL matches `url-regex`
#[derive(Debug, Clone, Deserialize)]
pub struct AccessCredentialEntry {
    #[serde(rename = "url-regex")]
    pub url_regex: String,

    #[serde(rename = "type")]
    pub kind: AccessCredentialKind,

    pub username: String,

    #[serde(default)]
    pub password: String,
}

/// A login sequence for URLs matching `url-regex`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCredentialEntry {
    #[serde(rename = "url-regex")]
    pub url_regex: String,

    #[serde(rename = "auth-page", default)]
    pub auth_pages: Vec<AuthPageEntry>,
}

/// How a page in a login sequence is recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthPageKind {
    Form,
    Link,
    Redirection,
    Content,
}

impl AuthPageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthPageKind::Form => "form",
            AuthPageKind::Link => "link",
            AuthPageKind::Redirection => "redirection",
            AuthPageKind::Content => "content",
        }
    }
}

/// One page of a login sequence
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPageEntry {
    #[serde(rename = "url-regex")]
    pub url_regex: String,

    pub kind: AuthPageKind,

    /// Form name, link target, redirection target or content pattern
    #[serde(rename = "match-regex", default)]
    pub match_regex: Option<String>,

    /// Replaces the discovered target URL when set and non-empty
    #[serde(rename = "override-target-url", default)]
    pub override_target_url: Option<String>,

    #[serde(rename = "parameter", default)]
    pub parameters: Vec<ParameterEntry>,
}

/// Form field override applied to fields whose name matches `name-regex`
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterEntry {
    #[serde(rename = "name-regex")]
    pub name_regex: String,

    #[serde(default)]
    pub value: String,
}
