//! Visit ledger (stamps)
//!
//! The cooldown check and the insert run inside one `IMMEDIATE` transaction,
//! so two concurrent appends for the same user and venue cannot both land
//! inside the window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::venues::{venue_from_row, VENUE_COLUMNS};
use super::{from_millis, text_conversion_error, to_millis, EngineDb};
use crate::error::EngineError;
use crate::geo::Coordinates;
use crate::models::{VerificationMethod, VisitEvent, VisitWithVenue};
use crate::store::{AppendOutcome, VisitLedger};

const VISIT_COLUMNS: &str =
    "s.id, s.user_id, s.venue_id, s.occurred_at, s.latitude, s.longitude, s.verification_method";

/// Number of columns in [`VISIT_COLUMNS`]
const VISIT_COLUMN_COUNT: usize = 7;

fn visit_from_row(row: &Row) -> Result<VisitEvent, rusqlite::Error> {
    let latitude: Option<f64> = row.get(4)?;
    let longitude: Option<f64> = row.get(5)?;
    let method: String = row.get(6)?;

    Ok(VisitEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        venue_id: row.get(2)?,
        occurred_at: from_millis(3, row.get(3)?)?,
        coordinates: latitude.zip(longitude).map(|(lat, lon)| Coordinates::new(lat, lon)),
        verification_method: method
            .parse::<VerificationMethod>()
            .map_err(|e| text_conversion_error(6, e))?,
    })
}

/// Most recent GPS or QR visit by `user_id` at `venue_id` strictly after `since`
pub fn latest_verified_visit_since(
    conn: &Connection,
    user_id: &str,
    venue_id: &str,
    since: DateTime<Utc>,
) -> Result<Option<VisitEvent>, EngineError> {
    let sql = format!(
        "SELECT {} FROM visits s
         WHERE s.user_id = ?1 AND s.venue_id = ?2 AND s.occurred_at > ?3
           AND s.verification_method IN ('gps', 'qr')
         ORDER BY s.occurred_at DESC LIMIT 1",
        VISIT_COLUMNS
    );

    let visit = conn
        .query_row(&sql, params![user_id, venue_id, to_millis(since)], visit_from_row)
        .optional()?;
    Ok(visit)
}

/// Insert a visit unless a verified one already sits inside the cooldown window
pub fn append_visit(
    conn: &mut Connection,
    event: &VisitEvent,
    cooldown_since: DateTime<Utc>,
) -> Result<AppendOutcome, EngineError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(existing) = latest_verified_visit_since(&tx, &event.user_id, &event.venue_id, cooldown_since)? {
        debug!(user_id = %event.user_id, venue_id = %event.venue_id, "Cooldown conflict on append");
        return Ok(AppendOutcome::CooldownConflict(existing));
    }

    tx.execute(
        "INSERT INTO visits (id, user_id, venue_id, occurred_at, latitude, longitude, verification_method)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id,
            event.user_id,
            event.venue_id,
            to_millis(event.occurred_at),
            event.coordinates.map(|c| c.latitude),
            event.coordinates.map(|c| c.longitude),
            event.verification_method.as_str(),
        ],
    )
    .map_err(|e| EngineError::Database(format!("Insert visit failed: {}", e)))?;

    tx.commit()?;
    Ok(AppendOutcome::Recorded)
}

/// All visits of a user joined with their venue, oldest first
pub fn visits_for_user(conn: &Connection, user_id: &str) -> Result<Vec<VisitWithVenue>, EngineError> {
    let sql = format!(
        "SELECT {}, {} FROM visits s
         INNER JOIN venues v ON v.id = s.venue_id
         WHERE s.user_id = ?1
         ORDER BY s.occurred_at ASC",
        VISIT_COLUMNS, VENUE_COLUMNS
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| EngineError::Database(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok(VisitWithVenue {
                visit: visit_from_row(row)?,
                venue: venue_from_row(row, VISIT_COLUMN_COUNT)?,
            })
        })
        .map_err(|e| EngineError::Database(format!("Query failed: {}", e)))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Database(format!("Row parse failed: {}", e)))
}

#[async_trait]
impl VisitLedger for EngineDb {
    async fn append(
        &self,
        event: &VisitEvent,
        cooldown_since: DateTime<Utc>,
    ) -> Result<AppendOutcome, EngineError> {
        self.with_conn_mut(|conn| append_visit(conn, event, cooldown_since))
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<VisitWithVenue>, EngineError> {
        self.with_conn(|conn| visits_for_user(conn, user_id))
    }

    async fn find_by_user_and_venue_since(
        &self,
        user_id: &str,
        venue_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<VisitEvent>, EngineError> {
        self.with_conn(|conn| latest_verified_visit_since(conn, user_id, venue_id, since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::venues::upsert_venue;
    use crate::models::{Venue, VenueType};
    use chrono::{Duration, TimeZone};

    fn setup() -> EngineDb {
        let db = EngineDb::open_in_memory().unwrap();
        let venue = Venue {
            id: "v1".into(),
            name: "Supra House".into(),
            venue_type: VenueType::Restaurant,
            categories: ["georgian".to_string()].into_iter().collect(),
            region: "tbilisi".into(),
            coordinates: Coordinates::new(41.6942, 44.7975),
            qr_code: "QR-SUPRA".into(),
            active: true,
        };
        db.with_conn(|conn| upsert_venue(conn, &venue)).unwrap();
        db
    }

    fn visit(id: &str, at: DateTime<Utc>, method: VerificationMethod) -> VisitEvent {
        VisitEvent {
            id: id.into(),
            user_id: "u1".into(),
            venue_id: "v1".into(),
            occurred_at: at,
            coordinates: match method {
                VerificationMethod::Gps => Some(Coordinates::new(41.6942, 44.7975)),
                _ => None,
            },
            verification_method: method,
        }
    }

    #[test]
    fn test_append_respects_window_boundary() {
        let db = setup();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        let window = Duration::hours(24);

        let first = visit("a", t0, VerificationMethod::Gps);
        let outcome = db.with_conn_mut(|conn| append_visit(conn, &first, t0 - window)).unwrap();
        assert_eq!(outcome, AppendOutcome::Recorded);

        let almost = t0 + Duration::hours(23) + Duration::minutes(59);
        let second = visit("b", almost, VerificationMethod::Qr);
        let outcome = db.with_conn_mut(|conn| append_visit(conn, &second, almost - window)).unwrap();
        assert!(matches!(outcome, AppendOutcome::CooldownConflict(ref v) if v.id == "a"));

        // Exactly one window later the earlier visit is no longer strictly inside
        let boundary = t0 + window;
        let third = visit("c", boundary, VerificationMethod::Qr);
        let outcome = db.with_conn_mut(|conn| append_visit(conn, &third, boundary - window)).unwrap();
        assert_eq!(outcome, AppendOutcome::Recorded);
    }

    #[test]
    fn test_manual_checkin_does_not_block_scan() {
        let db = setup();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        let window = Duration::hours(24);

        let manual = visit("m", t0, VerificationMethod::Manual);
        let outcome = db.with_conn_mut(|conn| append_visit(conn, &manual, t0 - window)).unwrap();
        assert_eq!(outcome, AppendOutcome::Recorded);

        let later = t0 + Duration::hours(1);
        let latest = db
            .with_conn(|conn| latest_verified_visit_since(conn, "u1", "v1", later - window))
            .unwrap();
        assert!(latest.is_none());

        let scanned = visit("q", later, VerificationMethod::Qr);
        let outcome = db.with_conn_mut(|conn| append_visit(conn, &scanned, later - window)).unwrap();
        assert_eq!(outcome, AppendOutcome::Recorded);

        let again = visit("g", later + Duration::minutes(5), VerificationMethod::Gps);
        let outcome = db
            .with_conn_mut(|conn| append_visit(conn, &again, again.occurred_at - window))
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::CooldownConflict(ref v) if v.id == "q"));
    }

    #[test]
    fn test_visits_for_user_joins_and_orders() {
        let db = setup();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        let later = visit("late", t0 + Duration::days(3), VerificationMethod::Manual);
        let earlier = visit("early", t0, VerificationMethod::Gps);

        for v in [&later, &earlier] {
            db.with_conn_mut(|conn| append_visit(conn, v, v.occurred_at - Duration::hours(24)))
                .unwrap();
        }

        let visits = db.with_conn(|conn| visits_for_user(conn, "u1")).unwrap();
        let ids: Vec<&str> = visits.iter().map(|v| v.visit.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(visits[0].venue.venue_type, VenueType::Restaurant);
        assert_eq!(visits[0].visit.coordinates, Some(Coordinates::new(41.6942, 44.7975)));
        assert_eq!(visits[1].visit.verification_method, VerificationMethod::Manual);
        assert_eq!(visits[1].visit.coordinates, None);
    }
}
