//! Database schema definitions
//!
//! This module contains the SQL schema for the Sumi-Sluice cache database.

use rusqlite::Connection;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Robots and DNS answers with their expiration
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT,
    expires_at TEXT NOT NULL
);

-- Session cookies per login sequence, in arrival order
CREATE TABLE IF NOT EXISTS session_cookies (
    sequence_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    origin TEXT NOT NULL,
    set_cookie TEXT NOT NULL,
    PRIMARY KEY (sequence_key, position)
);
"#;

/// Creates all tables if they do not exist yet
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
