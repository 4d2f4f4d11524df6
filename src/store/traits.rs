//! Collaborator traits and error types
//!
//! The fetch engine treats robots data, DNS answers, session cookies, event
//! gates and activity history as external services. These traits are the
//! seams; `memory` and `sqlite` provide implementations.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store lock poisoned: {0}")]
    Poisoned(String),

    #[error("Corrupt store entry for '{key}': {message}")]
    Corrupt { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A cached value with its expiration time
///
/// `value == None` is a real, cached answer ("no robots.txt", "host does
/// not resolve"), not a cache miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Checks whether the entry is still authoritative at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Key-value cache with TTL used for robots and DNS data
pub trait CacheStore: Send + Sync {
    /// Looks up a key; `Ok(None)` means nothing is cached
    fn lookup(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Writes (or replaces) a key
    fn write(&self, key: &str, value: Option<&str>, expires_at: DateTime<Utc>) -> StoreResult<()>;
}

/// One cookie as received: the Set-Cookie header value and the URL it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub origin: String,
    pub set_cookie: String,
}

/// Persistent cookies per login sequence key
pub trait CookieStore: Send + Sync {
    /// Reads the cookies saved for a sequence key (empty if none)
    fn read_cookies(&self, sequence_key: &str) -> StoreResult<Vec<SessionCookie>>;

    /// Replaces the cookies saved for a sequence key
    fn write_cookies(&self, sequence_key: &str, cookies: &[SessionCookie]) -> StoreResult<()>;
}

/// Named, process-wide exclusive sections
pub trait EventGate: Send + Sync {
    /// Tries to take ownership of `name`
    ///
    /// # Returns
    ///
    /// * `true` - The caller now owns the sequence and must complete it
    /// * `false` - Someone else owns it
    fn begin_event_sequence(&self, name: &str) -> bool;

    /// Releases a sequence taken with `begin_event_sequence`
    fn complete_event_sequence(&self, name: &str);
}

/// Kinds of activity the fetch layer reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Fetch,
    RobotsParse,
    LogonStart,
    LogonEnd,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Fetch => "fetch",
            ActivityKind::RobotsParse => "robots parse",
            ActivityKind::LogonStart => "logon start",
            ActivityKind::LogonEnd => "logon end",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the activity history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub started_at: DateTime<Utc>,
    pub kind: ActivityKind,
    pub byte_count: Option<u64>,
    pub target: String,
    pub result_code: Option<String>,
    pub message: Option<String>,
}

impl ActivityRecord {
    /// Creates a record stamped with the current time
    pub fn now(kind: ActivityKind, target: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            kind,
            byte_count: None,
            target: target.into(),
            result_code: None,
            message: None,
        }
    }

    pub fn with_result(mut self, code: impl Into<String>) -> Self {
        self.result_code = Some(code.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.byte_count = Some(bytes);
        self
    }
}

/// Append-only, fire-and-forget activity sink
pub trait ActivityRecorder: Send + Sync {
    fn record(&self, record: ActivityRecord);
}
