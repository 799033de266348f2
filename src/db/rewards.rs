//! Issued rewards
//!
//! `UNIQUE(user_id, challenge_id)` is the backstop for exactly-once issuance.
//! The record, the XP increment and the badge insert commit together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::users::{add_badge, add_xp};
use super::{from_millis, text_conversion_error, to_millis, EngineDb};
use crate::error::EngineError;
use crate::models::{RewardGrant, RewardKind, RewardRecord};
use crate::store::{check_redeemable, CreateOutcome, RewardStore};

const REWARD_COLUMNS: &str =
    "id, user_id, challenge_id, kind, value, redeemed, issued_at, expires_at";

fn reward_from_row(row: &Row) -> Result<RewardRecord, rusqlite::Error> {
    let kind: String = row.get(3)?;
    let expires_at: Option<i64> = row.get(7)?;

    Ok(RewardRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        challenge_id: row.get(2)?,
        kind: kind.parse::<RewardKind>().map_err(|e| text_conversion_error(3, e))?,
        value: row.get(4)?,
        redeemed: row.get::<_, i64>(5)? != 0,
        issued_at: from_millis(6, row.get(6)?)?,
        expires_at: expires_at.map(|ms| from_millis(7, ms)).transpose()?,
    })
}

pub fn get_reward(
    conn: &Connection,
    user_id: &str,
    challenge_id: &str,
) -> Result<Option<RewardRecord>, EngineError> {
    let sql = format!(
        "SELECT {} FROM rewards WHERE user_id = ?1 AND challenge_id = ?2",
        REWARD_COLUMNS
    );
    let reward = conn
        .query_row(&sql, params![user_id, challenge_id], reward_from_row)
        .optional()?;
    Ok(reward)
}

pub fn get_reward_by_id(conn: &Connection, id: &str) -> Result<Option<RewardRecord>, EngineError> {
    let sql = format!("SELECT {} FROM rewards WHERE id = ?1", REWARD_COLUMNS);
    let reward = conn.query_row(&sql, params![id], reward_from_row).optional()?;
    Ok(reward)
}

pub fn rewards_for_user(conn: &Connection, user_id: &str) -> Result<Vec<RewardRecord>, EngineError> {
    let sql = format!(
        "SELECT {} FROM rewards WHERE user_id = ?1 ORDER BY issued_at ASC",
        REWARD_COLUMNS
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| EngineError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![user_id], reward_from_row)
        .map_err(|e| EngineError::Database(format!("Query failed: {}", e)))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Database(format!("Row parse failed: {}", e)))
}

/// Insert a reward with its XP and badge side effects, or report the
/// existing record for the same (user, challenge)
pub fn create_reward(conn: &mut Connection, grant: &RewardGrant) -> Result<CreateOutcome, EngineError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let record = &grant.record;

    let inserted = tx
        .execute(
            "INSERT INTO rewards (id, user_id, challenge_id, kind, value, redeemed, issued_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, challenge_id) DO NOTHING",
            params![
                record.id,
                record.user_id,
                record.challenge_id,
                record.kind.as_str(),
                record.value,
                record.redeemed as i64,
                to_millis(record.issued_at),
                record.expires_at.map(to_millis),
            ],
        )
        .map_err(|e| EngineError::Database(format!("Insert reward failed: {}", e)))?;

    if inserted == 0 {
        debug!(user_id = %record.user_id, challenge_id = %record.challenge_id, "Reward already exists");
        let existing = get_reward(&tx, &record.user_id, &record.challenge_id)?
            .ok_or_else(|| EngineError::Internal("Conflicting reward vanished".into()))?;
        return Ok(CreateOutcome::Duplicate(existing));
    }

    add_xp(&tx, &record.user_id, grant.xp)?;
    if let Some(badge) = &grant.badge {
        add_badge(&tx, &record.user_id, badge)?;
    }

    tx.commit()?;
    Ok(CreateOutcome::Created(record.clone()))
}

pub fn redeem_reward(
    conn: &mut Connection,
    user_id: &str,
    reward_id: &str,
    now: DateTime<Utc>,
) -> Result<RewardRecord, EngineError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut record = get_reward_by_id(&tx, reward_id)?
        .ok_or_else(|| EngineError::NotFound(format!("Reward {}", reward_id)))?;
    check_redeemable(&record, user_id, now)?;

    tx.execute("UPDATE rewards SET redeemed = 1 WHERE id = ?1", params![reward_id])
        .map_err(|e| EngineError::Database(format!("Update failed: {}", e)))?;
    tx.commit()?;

    record.redeemed = true;
    Ok(record)
}

#[async_trait]
impl RewardStore for EngineDb {
    async fn find(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Option<RewardRecord>, EngineError> {
        self.with_conn(|conn| get_reward(conn, user_id, challenge_id))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RewardRecord>, EngineError> {
        self.with_conn(|conn| rewards_for_user(conn, user_id))
    }

    async fn create(&self, grant: RewardGrant) -> Result<CreateOutcome, EngineError> {
        self.with_conn_mut(|conn| create_reward(conn, &grant))
    }

    async fn redeem(
        &self,
        user_id: &str,
        reward_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RewardRecord, EngineError> {
        self.with_conn_mut(|conn| redeem_reward(conn, user_id, reward_id, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::get_profile;
    use chrono::{Duration, TimeZone};

    fn grant(id: &str, expires_at: Option<DateTime<Utc>>) -> RewardGrant {
        RewardGrant {
            record: RewardRecord {
                id: id.into(),
                user_id: "u1".into(),
                challenge_id: "wine-trail".into(),
                kind: RewardKind::Badge,
                value: "Sommelier".into(),
                redeemed: false,
                issued_at: Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap(),
                expires_at,
            },
            xp: 100,
            badge: Some("Sommelier".into()),
        }
    }

    #[test]
    fn test_second_create_is_duplicate_without_side_effects() {
        let db = EngineDb::open_in_memory().unwrap();

        let first = db.with_conn_mut(|conn| create_reward(conn, &grant("r1", None))).unwrap();
        assert!(matches!(first, CreateOutcome::Created(ref r) if r.id == "r1"));

        let second = db.with_conn_mut(|conn| create_reward(conn, &grant("r2", None))).unwrap();
        assert!(matches!(second, CreateOutcome::Duplicate(ref r) if r.id == "r1"));

        let profile = db.with_conn(|conn| get_profile(conn, "u1")).unwrap();
        assert_eq!(profile.xp, 100);
        assert_eq!(profile.badges.len(), 1);
        assert_eq!(db.with_conn(|conn| rewards_for_user(conn, "u1")).unwrap().len(), 1);
    }

    #[test]
    fn test_redeem_rules() {
        let db = EngineDb::open_in_memory().unwrap();
        let issued = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        db.with_conn_mut(|conn| create_reward(conn, &grant("r1", Some(issued + Duration::days(30)))))
            .unwrap();

        let err = db.with_conn_mut(|conn| redeem_reward(conn, "u2", "r1", issued)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let late = issued + Duration::days(31);
        let err = db.with_conn_mut(|conn| redeem_reward(conn, "u1", "r1", late)).unwrap_err();
        assert!(matches!(err, EngineError::RewardExpired(_)));

        let redeemed = db.with_conn_mut(|conn| redeem_reward(conn, "u1", "r1", issued)).unwrap();
        assert!(redeemed.redeemed);

        let err = db.with_conn_mut(|conn| redeem_reward(conn, "u1", "r1", issued)).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }
}
