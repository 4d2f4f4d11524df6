//! Robots.txt cache entries and their expiration policy
//!
//! Robots data lives in the external cache store as the raw body text. A
//! missing body means "no rules" (allow everything): that is what gets stored
//! when the file does not exist or could not be fetched.

use crate::robots::RobotsRuleSet;
use crate::store::CacheEntry;
use chrono::{DateTime, Duration, Utc};
use url::Url;

/// How long a fetched robots.txt (or a definitive "none") stays valid
pub fn success_ttl() -> Duration {
    Duration::hours(24)
}

/// How long a robots.txt that could not be fetched stays cached
pub fn failure_ttl() -> Duration {
    Duration::hours(6)
}

/// Cache key for a robots lookup key
pub fn cache_key(robots_key: &str) -> String {
    format!("ROBOTS_{}", robots_key)
}

/// Event-gate name serializing robots fetches for one key
pub fn event_name(robots_key: &str) -> String {
    format!("webcrawler:robots:{}", robots_key)
}

/// Builds the robots key for a URL: `host:port`, prefixed with the scheme
/// when the scheme is not plain http
///
/// # Returns
///
/// * `Some(String)` - The key
/// * `None` - The URL has no host or no known port
pub fn robots_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let port = url.port_or_known_default()?;
    let key = format!("{}:{}", host, port);
    if url.scheme() == "http" {
        Some(key)
    } else {
        Some(format!("{}:{}", url.scheme(), key))
    }
}

/// Robots data read back from the cache store
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// Parsed rules; `None` means the site has no usable robots.txt
    pub rules: Option<RobotsRuleSet>,

    /// When this entry stops being authoritative
    pub expires_at: DateTime<Utc>,
}

impl CachedRobots {
    /// Rebuilds cached robots data from a store entry, reparsing the body
    pub fn from_entry(entry: &CacheEntry, host: &str) -> Self {
        let rules = entry
            .value
            .as_deref()
            .map(|text| RobotsRuleSet::parse(text, host).rules);
        Self {
            rules,
            expires_at: entry.expires_at,
        }
    }

    /// Checks if the entry has expired as of `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Checks a path against the cached rules; no rules means allowed
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        match &self.rules {
            Some(rules) => rules.is_fetch_allowed(user_agent, path),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: Option<&str>, expires_in: Duration) -> CacheEntry {
        CacheEntry {
            value: value.map(str::to_string),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[test]
    fn test_robots_key_http_omits_scheme() {
        let url = Url::parse("http://Example.com/page").unwrap();
        assert_eq!(robots_key(&url).as_deref(), Some("example.com:80"));
    }

    #[test]
    fn test_robots_key_https_includes_scheme() {
        let url = Url::parse("https://example.com:8443/page").unwrap();
        assert_eq!(
            robots_key(&url).as_deref(),
            Some("https:example.com:8443")
        );
    }

    #[test]
    fn test_keys_and_event_names() {
        assert_eq!(cache_key("example.com:80"), "ROBOTS_example.com:80");
        assert_eq!(event_name("example.com:80"), "webcrawler:robots:example.com:80");
    }

    #[test]
    fn test_entry_without_body_allows_everything() {
        let cached = CachedRobots::from_entry(&entry(None, Duration::hours(1)), "example.com");
        assert!(cached.rules.is_none());
        assert!(cached.is_allowed("bot", "/private"));
    }

    #[test]
    fn test_entry_with_body_is_parsed() {
        let cached = CachedRobots::from_entry(
            &entry(Some("User-agent: *\nDisallow: /private\n"), Duration::hours(1)),
            "example.com",
        );
        assert!(!cached.is_allowed("bot", "/private/x"));
        assert!(cached.is_allowed("bot", "/public"));
    }

    #[test]
    fn test_expiration() {
        let now = Utc::now();
        let fresh = CachedRobots::from_entry(&entry(None, Duration::hours(23)), "example.com");
        let stale = CachedRobots::from_entry(&entry(None, -Duration::hours(1)), "example.com");
        assert!(!fresh.is_expired(now));
        assert!(stale.is_expired(now));
    }

    #[test]
    fn test_failure_ttl_shorter_than_success() {
        assert!(failure_ttl() < success_ttl());
    }
}
