//! External collaborators of the fetch engine
//!
//! This module defines the store, gate and activity traits and provides:
//! - In-memory implementations for tests and single-process use
//! - A SQLite cache/cookie store for persistence across runs

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::{MemoryActivityLog, MemoryEventGate, MemoryStore, TracingActivityRecorder};
pub use sqlite::SqliteStore;
pub use traits::{
    ActivityKind, ActivityRecord, ActivityRecorder, CacheEntry, CacheStore, CookieStore,
    EventGate, SessionCookie, StoreError, StoreResult,
};

use std::path::Path;
use std::sync::Arc;

/// A cache store and cookie store pair sharing one backend
#[derive(Clone)]
pub struct Stores {
    pub cache: Arc<dyn CacheStore>,
    pub cookies: Arc<dyn CookieStore>,
}

impl Stores {
    /// Stores held in memory for the lifetime of the process
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            cache: store.clone(),
            cookies: store,
        }
    }

    /// Stores persisted in a SQLite database at `path`
    pub fn sqlite(path: &Path) -> StoreResult<Self> {
        let store = Arc::new(SqliteStore::new(path)?);
        Ok(Self {
            cache: store.clone(),
            cookies: store,
        })
    }
}
