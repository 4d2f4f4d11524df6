//! SQLite store implementation
//!
//! This module provides a SQLite-backed implementation of the cache and
//! cookie store traits, for robots/DNS data that should survive restarts.

use crate::store::schema::initialize_schema;
use crate::store::traits::{
    CacheEntry, CacheStore, CookieStore, SessionCookie, StoreError, StoreResult,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite store backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a store database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl CacheStore for SqliteStore {
    fn lookup(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let conn = self.conn()?;
        let row: Option<(Option<String>, String)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((value, expires_at)) = row else {
            return Ok(None);
        };

        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Some(CacheEntry { value, expires_at }))
    }

    fn write(&self, key: &str, value: Option<&str>, expires_at: DateTime<Utc>) -> StoreResult<()> {
        self.conn()?.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at.to_rfc3339()],
        )?;
        Ok(())
    }
}

impl CookieStore for SqliteStore {
    fn read_cookies(&self, sequence_key: &str) -> StoreResult<Vec<SessionCookie>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT origin, set_cookie FROM session_cookies
             WHERE sequence_key = ?1 ORDER BY position",
        )?;

        let cookies = stmt
            .query_map(params![sequence_key], |row| {
                Ok(SessionCookie {
                    origin: row.get(0)?,
                    set_cookie: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(cookies)
    }

    fn write_cookies(&self, sequence_key: &str, cookies: &[SessionCookie]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM session_cookies WHERE sequence_key = ?1",
            params![sequence_key],
        )?;
        for (position, cookie) in cookies.iter().enumerate() {
            tx.execute(
                "INSERT INTO session_cookies (sequence_key, position, origin, set_cookie)
                 VALUES (?1, ?2, ?3, ?4)",
                params![sequence_key, position as i64, cookie.origin, cookie.set_cookie],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
