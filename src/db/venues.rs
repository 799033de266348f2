//! Venue directory mirror

use std::collections::BTreeSet;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{text_conversion_error, EngineDb};
use crate::error::EngineError;
use crate::geo::Coordinates;
use crate::models::{Venue, VenueType};
use crate::store::VenueLookup;

pub(crate) const VENUE_COLUMNS: &str =
    "v.id, v.name, v.venue_type, v.categories_json, v.region, v.latitude, v.longitude, v.qr_code, v.active";

/// Decode a venue from a row whose columns start at `offset` in [`VENUE_COLUMNS`] order
pub(crate) fn venue_from_row(row: &Row, offset: usize) -> Result<Venue, rusqlite::Error> {
    let venue_type: String = row.get(offset + 2)?;
    let venue_type = venue_type
        .parse::<VenueType>()
        .map_err(|e| text_conversion_error(offset + 2, e))?;

    let categories_json: String = row.get(offset + 3)?;
    let categories: BTreeSet<String> = serde_json::from_str(&categories_json)
        .map_err(|e| text_conversion_error(offset + 3, e.into()))?;

    Ok(Venue {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        venue_type,
        categories,
        region: row.get(offset + 4)?,
        coordinates: Coordinates::new(row.get(offset + 5)?, row.get(offset + 6)?),
        qr_code: row.get(offset + 7)?,
        active: row.get::<_, i64>(offset + 8)? != 0,
    })
}

/// Insert or replace a venue
pub fn upsert_venue(conn: &Connection, venue: &Venue) -> Result<(), EngineError> {
    let categories_json = serde_json::to_string(&venue.categories)?;

    conn.execute(
        "INSERT INTO venues (id, name, venue_type, categories_json, region, latitude, longitude, qr_code, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            venue_type = excluded.venue_type,
            categories_json = excluded.categories_json,
            region = excluded.region,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            qr_code = excluded.qr_code,
            active = excluded.active",
        params![
            venue.id,
            venue.name,
            venue.venue_type.as_str(),
            categories_json,
            venue.region,
            venue.coordinates.latitude,
            venue.coordinates.longitude,
            venue.qr_code,
            venue.active as i64,
        ],
    )
    .map_err(|e| EngineError::Database(format!("Upsert venue {} failed: {}", venue.id, e)))?;

    Ok(())
}

fn get_venue_where(conn: &Connection, clause: &str, key: &str) -> Result<Option<Venue>, EngineError> {
    let sql = format!("SELECT {} FROM venues v WHERE {} LIMIT 1", VENUE_COLUMNS, clause);
    let venue = conn
        .query_row(&sql, params![key], |row| venue_from_row(row, 0))
        .optional()?;
    Ok(venue)
}

pub fn get_venue(conn: &Connection, id: &str) -> Result<Option<Venue>, EngineError> {
    get_venue_where(conn, "v.id = ?1", id)
}

pub fn get_venue_by_qr(conn: &Connection, code: &str) -> Result<Option<Venue>, EngineError> {
    get_venue_where(conn, "v.qr_code = ?1", code)
}

#[async_trait]
impl VenueLookup for EngineDb {
    async fn by_id(&self, id: &str) -> Result<Option<Venue>, EngineError> {
        self.with_conn(|conn| get_venue(conn, id))
    }

    async fn by_qr_code(&self, code: &str) -> Result<Option<Venue>, EngineError> {
        self.with_conn(|conn| get_venue_by_qr(conn, code))
    }
}
