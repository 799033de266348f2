//! XP balances and badge sets

use std::collections::BTreeSet;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::EngineDb;
use crate::error::EngineError;
use crate::models::UserProfile;
use crate::store::UserStats;

/// Increment a user's XP and return the new balance
pub fn add_xp(conn: &Connection, user_id: &str, amount: i64) -> Result<i64, EngineError> {
    conn.execute(
        "INSERT INTO user_stats (user_id, xp) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO UPDATE SET xp = xp + excluded.xp",
        params![user_id, amount],
    )
    .map_err(|e| EngineError::Database(format!("XP update failed: {}", e)))?;

    let xp: i64 = conn.query_row(
        "SELECT xp FROM user_stats WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(xp)
}

/// Add a badge; re-adding a held badge is a no-op
pub fn add_badge(conn: &Connection, user_id: &str, badge: &str) -> Result<bool, EngineError> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO user_badges (user_id, badge) VALUES (?1, ?2)",
            params![user_id, badge],
        )
        .map_err(|e| EngineError::Database(format!("Badge insert failed: {}", e)))?;
    Ok(inserted > 0)
}

pub fn get_profile(conn: &Connection, user_id: &str) -> Result<UserProfile, EngineError> {
    let xp: Option<i64> = conn
        .query_row(
            "SELECT xp FROM user_stats WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;

    let mut stmt = conn
        .prepare("SELECT badge FROM user_badges WHERE user_id = ?1")
        .map_err(|e| EngineError::Database(format!("Prepare failed: {}", e)))?;
    let badges: BTreeSet<String> = stmt
        .query_map(params![user_id], |row| row.get(0))
        .map_err(|e| EngineError::Database(format!("Query failed: {}", e)))?
        .collect::<Result<_, _>>()
        .map_err(|e| EngineError::Database(format!("Row parse failed: {}", e)))?;

    Ok(UserProfile {
        user_id: user_id.to_string(),
        xp: xp.unwrap_or(0),
        badges,
    })
}

#[async_trait]
impl UserStats for EngineDb {
    async fn add_xp(&self, user_id: &str, amount: i64) -> Result<i64, EngineError> {
        self.with_conn(|conn| add_xp(conn, user_id, amount))
    }

    async fn profile(&self, user_id: &str) -> Result<UserProfile, EngineError> {
        self.with_conn(|conn| get_profile(conn, user_id))
    }
}
