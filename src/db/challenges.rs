//! Challenge definitions

use async_trait::async_trait;
use rusqlite::{params, Connection, Row};

use super::{text_conversion_error, EngineDb};
use crate::error::EngineError;
use crate::models::{ChallengeDefinition, Requirements, RewardKind, RewardSpec};
use crate::store::ChallengeCatalog;

const CHALLENGE_COLUMNS: &str =
    "id, name, description, active, requirements_json, reward_kind, reward_value, reward_valid_days, xp_reward";

fn challenge_from_row(row: &Row) -> Result<ChallengeDefinition, rusqlite::Error> {
    let requirements_json: String = row.get(4)?;
    let requirements: Requirements = serde_json::from_str(&requirements_json)
        .map_err(|e| text_conversion_error(4, e.into()))?;

    let reward_kind: String = row.get(5)?;
    let reward_kind = reward_kind
        .parse::<RewardKind>()
        .map_err(|e| text_conversion_error(5, e))?;

    Ok(ChallengeDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        requirements,
        reward: RewardSpec {
            kind: reward_kind,
            value: row.get(6)?,
            valid_days: row.get(7)?,
        },
        xp_reward: row.get(8)?,
    })
}

/// Insert or replace a challenge definition. Callers validate first.
pub fn upsert_challenge(conn: &Connection, definition: &ChallengeDefinition) -> Result<(), EngineError> {
    let requirements_json = serde_json::to_string(&definition.requirements)?;

    conn.execute(
        "INSERT INTO challenges (id, name, description, active, requirements_json, reward_kind, reward_value, reward_valid_days, xp_reward)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            active = excluded.active,
            requirements_json = excluded.requirements_json,
            reward_kind = excluded.reward_kind,
            reward_value = excluded.reward_value,
            reward_valid_days = excluded.reward_valid_days,
            xp_reward = excluded.xp_reward",
        params![
            definition.id,
            definition.name,
            definition.description,
            definition.active as i64,
            requirements_json,
            definition.reward.kind.as_str(),
            definition.reward.value,
            definition.reward.valid_days,
            definition.xp_reward,
        ],
    )
    .map_err(|e| EngineError::Database(format!("Upsert challenge {} failed: {}", definition.id, e)))?;

    Ok(())
}

pub fn list_challenges(conn: &Connection, active_only: bool) -> Result<Vec<ChallengeDefinition>, EngineError> {
    let mut sql = format!("SELECT {} FROM challenges", CHALLENGE_COLUMNS);
    if active_only {
        sql.push_str(" WHERE active = 1");
    }
    sql.push_str(" ORDER BY id ASC");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| EngineError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map([], challenge_from_row)
        .map_err(|e| EngineError::Database(format!("Query failed: {}", e)))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Database(format!("Row parse failed: {}", e)))
}

#[async_trait]
impl ChallengeCatalog for EngineDb {
    async fn active_definitions(&self) -> Result<Vec<ChallengeDefinition>, EngineError> {
        self.with_conn(|conn| list_challenges(conn, true))
    }
}
