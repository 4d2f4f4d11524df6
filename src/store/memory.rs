//! In-memory collaborator implementations
//!
//! Used when no database is configured, and throughout the tests.

use crate::store::traits::{
    ActivityKind, ActivityRecord, ActivityRecorder, CacheEntry, CacheStore, CookieStore,
    EventGate, SessionCookie, StoreError, StoreResult,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> StoreResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| StoreError::Poisoned(format!("{}: {}", what, e)))
}

/// Cache and cookie store backed by hash maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    cookies: Mutex<HashMap<String, Vec<SessionCookie>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn lookup(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(lock(&self.entries, "cache")?.get(key).cloned())
    }

    fn write(&self, key: &str, value: Option<&str>, expires_at: DateTime<Utc>) -> StoreResult<()> {
        lock(&self.entries, "cache")?.insert(
            key.to_string(),
            CacheEntry {
                value: value.map(str::to_string),
                expires_at,
            },
        );
        Ok(())
    }
}

impl CookieStore for MemoryStore {
    fn read_cookies(&self, sequence_key: &str) -> StoreResult<Vec<SessionCookie>> {
        Ok(lock(&self.cookies, "cookies")?
            .get(sequence_key)
            .cloned()
            .unwrap_or_default())
    }

    fn write_cookies(&self, sequence_key: &str, cookies: &[SessionCookie]) -> StoreResult<()> {
        lock(&self.cookies, "cookies")?.insert(sequence_key.to_string(), cookies.to_vec());
        Ok(())
    }
}

/// Event gate holding the set of owned sequence names
#[derive(Debug, Default)]
pub struct MemoryEventGate {
    held: Mutex<HashSet<String>>,
}

impl MemoryEventGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether a sequence is currently owned
    pub fn is_held(&self, name: &str) -> bool {
        match self.held.lock() {
            Ok(held) => held.contains(name),
            Err(poisoned) => poisoned.into_inner().contains(name),
        }
    }
}

impl EventGate for MemoryEventGate {
    fn begin_event_sequence(&self, name: &str) -> bool {
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.insert(name.to_string())
    }

    fn complete_event_sequence(&self, name: &str) {
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.remove(name) {
            tracing::warn!("Completed event sequence '{}' that was not held", name);
        }
    }
}

/// Activity recorder that keeps every record for later inspection
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records so far
    pub fn records(&self) -> Vec<ActivityRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the records of one kind
    pub fn records_of(&self, kind: ActivityKind) -> Vec<ActivityRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }
}

impl ActivityRecorder for MemoryActivityLog {
    fn record(&self, record: ActivityRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Activity recorder that writes each record to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityRecorder;

impl ActivityRecorder for TracingActivityRecorder {
    fn record(&self, record: ActivityRecord) {
        tracing::info!(
            "activity {} target={} result={} bytes={} {}",
            record.kind,
            record.target,
            record.result_code.as_deref().unwrap_or("-"),
            record
                .byte_count
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.message.as_deref().unwrap_or("")
        );
    }
}
