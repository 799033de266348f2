//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::EngineError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version == SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
    } else {
        return Err(EngineError::Database(format!(
            "Unsupported schema v{} (expected v{})",
            current_version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, EngineError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| EngineError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), EngineError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| EngineError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| EngineError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(CATALOG_SCHEMA)
        .map_err(|e| EngineError::Database(format!("Failed to create catalog tables: {}", e)))?;

    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| EngineError::Database(format!("Failed to create ledger tables: {}", e)))?;

    conn.execute_batch(USERS_SCHEMA)
        .map_err(|e| EngineError::Database(format!("Failed to create user tables: {}", e)))?;

    Ok(())
}

/// Venues and challenge definitions
const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS venues (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    venue_type TEXT NOT NULL,
    categories_json TEXT NOT NULL DEFAULT '[]',
    region TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    qr_code TEXT NOT NULL UNIQUE,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS challenges (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    -- Tagged union: {"kind": "simple", ...} or {"kind": "combo", ...}
    requirements_json TEXT NOT NULL,
    reward_kind TEXT NOT NULL,
    reward_value TEXT NOT NULL,
    reward_valid_days INTEGER,
    xp_reward INTEGER NOT NULL DEFAULT 0
);
"#;

/// Visit ledger and rewards
const LEDGER_SCHEMA: &str = r#"
-- Append-only: rows are never updated or deleted by the engine
CREATE TABLE IF NOT EXISTS visits (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    venue_id TEXT NOT NULL,
    occurred_at INTEGER NOT NULL,
    latitude REAL,
    longitude REAL,
    verification_method TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_visits_user_venue_time ON visits(user_id, venue_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_visits_user_time ON visits(user_id, occurred_at);

CREATE TABLE IF NOT EXISTS rewards (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    challenge_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    value TEXT NOT NULL,
    redeemed INTEGER NOT NULL DEFAULT 0,
    issued_at INTEGER NOT NULL,
    expires_at INTEGER,
    UNIQUE (user_id, challenge_id)
);
"#;

/// XP balances and badges
const USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_stats (
    user_id TEXT PRIMARY KEY NOT NULL,
    xp INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS user_badges (
    user_id TEXT NOT NULL,
    badge TEXT NOT NULL,
    PRIMARY KEY (user_id, badge)
);
"#;
