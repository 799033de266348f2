//! SQLite database module for visits, rewards and user stats
//!
//! [`EngineDb`] implements every collaborator trait from [`crate::store`] on
//! top of one SQLite connection, so a single file can back a whole
//! deployment.
//!
//! ## Tables
//!
//! - `venues` - Venue directory mirror (read-only to the engine)
//! - `visits` - Append-only stamp ledger
//! - `challenges` - Challenge definitions, requirements stored as JSON
//! - `rewards` - Issued rewards, `UNIQUE(user_id, challenge_id)`
//! - `user_stats` / `user_badges` - XP balance and badge set per user
//!
//! Timestamps are stored as INTEGER milliseconds since the epoch so window
//! queries compare numbers rather than strings.

pub mod schema;
pub mod venues;
pub mod visits;
pub mod challenges;
pub mod rewards;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::models::Catalog;

/// SQLite-backed store
pub struct EngineDb {
    conn: Mutex<Connection>,
}

impl EngineDb {
    /// Open or create the database at `db_path`
    pub fn open(db_path: &Path) -> Result<Self, EngineError> {
        info!("Opening SQLite database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Database(format!("Failed to open SQLite: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| EngineError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, EngineError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), EngineError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read with the connection locked
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Connection) -> Result<T, EngineError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Import venues and challenge definitions in one transaction
    pub fn import_catalog(&self, catalog: &Catalog) -> Result<ImportSummary, EngineError> {
        for definition in &catalog.challenges {
            definition.validate()?;
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for venue in &catalog.venues {
                venues::upsert_venue(&tx, venue)?;
            }
            for definition in &catalog.challenges {
                challenges::upsert_challenge(&tx, definition)?;
            }
            tx.commit()?;

            info!(
                venues = catalog.venues.len(),
                challenges = catalog.challenges.len(),
                "Catalog imported"
            );

            Ok(ImportSummary {
                venues: catalog.venues.len() as u64,
                challenges: catalog.challenges.len() as u64,
            })
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, EngineError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, EngineError> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .map_err(|e| EngineError::Database(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                venue_count: count("venues")?,
                visit_count: count("visits")?,
                challenge_count: count("challenges")?,
                reward_count: count("rewards")?,
                user_count: count("user_stats")?,
            })
        })
    }
}

/// Result of a catalog import
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImportSummary {
    pub venues: u64,
    pub challenges: u64,
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub venue_count: u64,
    pub visit_count: u64,
    pub challenge_count: u64,
    pub reward_count: u64,
    pub user_count: u64,
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(idx: usize, millis: i64) -> Result<DateTime<Utc>, rusqlite::Error> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

/// Wrap a decode failure for a TEXT column so it can leave a row mapper
pub(crate) fn text_conversion_error(idx: usize, e: EngineError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk_and_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("stamps.db");

        let db = EngineDb::open(&path).unwrap();
        assert_eq!(db.stats().unwrap().visit_count, 0);
        drop(db);

        // Second open sees an existing schema
        let db = EngineDb::open(&path).unwrap();
        assert_eq!(db.stats().unwrap().reward_count, 0);
    }

    #[test]
    fn test_millis_round_trip() {
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(from_millis(0, to_millis(at)).unwrap(), at);
    }
}
