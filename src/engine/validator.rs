//! Proof-of-visit validation
//!
//! Turns a [`VisitRequest`] into a [`VisitEvent`] or a terminal rejection.
//! Checks run in a fixed order: rate limit, venue resolution, QR match, GPS
//! proximity, cooldown. The rate limit runs first so abusive callers learn
//! nothing about venue or QR validity.

use std::sync::Arc;

use uuid::Uuid;

use super::rate_limit::{ceil_minutes, RateLimitConfig, VisitRateLimiter};
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::models::{Venue, VenueRef, VerificationMethod, VisitEvent, VisitRequest};
use crate::store::{VenueLookup, VisitLedger};

pub struct ProofOfVisitValidator {
    venues: Arc<dyn VenueLookup>,
    ledger: Arc<dyn VisitLedger>,
    limiter: VisitRateLimiter,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl ProofOfVisitValidator {
    pub fn new(
        venues: Arc<dyn VenueLookup>,
        ledger: Arc<dyn VisitLedger>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let limiter = VisitRateLimiter::new(RateLimitConfig {
            max_requests: settings.rate_limit_max_requests,
            window: settings.rate_limit_window(),
        });

        Self {
            venues,
            ledger,
            limiter,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn rate_limiter(&self) -> &VisitRateLimiter {
        &self.limiter
    }

    /// Validate a request and build the visit event it would record
    pub async fn validate(&self, request: &VisitRequest) -> Result<VisitEvent, EngineError> {
        let now = self.clock.now();

        self.limiter.check(&request.user_id, now)?;

        let venue = self.resolve_venue(&request.venue).await?;

        match request.method {
            VerificationMethod::Qr => self.check_qr(request, &venue)?,
            VerificationMethod::Gps => self.check_proximity(request, &venue)?,
            VerificationMethod::Manual => {}
        }

        let since = now - self.settings.cooldown();
        if let Some(previous) = self
            .ledger
            .find_by_user_and_venue_since(&request.user_id, &venue.id, since)
            .await?
        {
            return Err(self.cooldown_error(&previous, now));
        }

        Ok(VisitEvent {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            venue_id: venue.id,
            occurred_at: now,
            coordinates: request.proof.coordinates,
            verification_method: request.method,
        })
    }

    /// `CooldownActive` for a visit still inside the window
    pub fn cooldown_error(&self, previous: &VisitEvent, now: chrono::DateTime<chrono::Utc>) -> EngineError {
        let ends_at = previous.occurred_at + self.settings.cooldown();
        EngineError::CooldownActive {
            remaining_minutes: ceil_minutes(ends_at - now),
        }
    }

    async fn resolve_venue(&self, venue_ref: &VenueRef) -> Result<Venue, EngineError> {
        let (venue, label) = match venue_ref {
            VenueRef::Id(id) => (self.venues.by_id(id).await?, id),
            VenueRef::QrCode(code) => (self.venues.by_qr_code(code).await?, code),
        };

        match venue {
            Some(v) if v.active => Ok(v),
            _ => Err(EngineError::NotFound(format!("Venue {}", label))),
        }
    }

    fn check_qr(&self, request: &VisitRequest, venue: &Venue) -> Result<(), EngineError> {
        let supplied = request.proof.qr_code.as_deref().or(match &request.venue {
            VenueRef::QrCode(code) => Some(code.as_str()),
            VenueRef::Id(_) => None,
        });

        match supplied {
            Some(code) if code == venue.qr_code => Ok(()),
            _ => Err(EngineError::QrInvalid),
        }
    }

    fn check_proximity(&self, request: &VisitRequest, venue: &Venue) -> Result<(), EngineError> {
        let position = request.proof.coordinates.ok_or_else(|| {
            EngineError::InvalidInput("GPS check-in requires coordinates".into())
        })?;
        if !position.is_valid() {
            return Err(EngineError::InvalidInput(format!(
                "GPS coordinates out of range: {}, {}",
                position.latitude, position.longitude
            )));
        }

        let distance = position.distance_to(&venue.coordinates);
        if distance.is_nan() || distance > self.settings.gps_threshold_meters {
            return Err(EngineError::TooFar {
                distance_meters: distance.round() as u64,
                max_meters: self.settings.gps_threshold_meters.round() as u64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::Coordinates;
    use crate::models::{VenueType, VisitProof};
    use crate::store::{AppendOutcome, MemoryStore};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        validator: ProofOfVisitValidator,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store
            .put_venue(Venue {
                id: "v1".into(),
                name: "Khareba Cellar".into(),
                venue_type: VenueType::Winery,
                categories: ["wine".to_string()].into_iter().collect(),
                region: "kakheti".into(),
                coordinates: Coordinates::new(41.6942, 44.7975),
                qr_code: "QR-KHAREBA".into(),
                active: true,
            })
            .await;
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()));
        let validator = ProofOfVisitValidator::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            EngineSettings::default(),
        );
        Fixture { store, clock, validator }
    }

    fn gps_request(lat: f64, lon: f64) -> VisitRequest {
        VisitRequest {
            user_id: "u1".into(),
            venue: VenueRef::Id("v1".into()),
            method: VerificationMethod::Gps,
            proof: VisitProof {
                qr_code: None,
                coordinates: Some(Coordinates::new(lat, lon)),
            },
        }
    }

    #[tokio::test]
    async fn test_gps_at_venue_passes() {
        let f = fixture().await;
        let event = f.validator.validate(&gps_request(41.6942, 44.7975)).await.unwrap();
        assert_eq!(event.venue_id, "v1");
        assert_eq!(event.occurred_at, f.clock.now());
        assert_eq!(event.verification_method, VerificationMethod::Gps);
    }

    #[tokio::test]
    async fn test_gps_too_far_reports_rounded_distance() {
        let f = fixture().await;
        let err = f.validator.validate(&gps_request(41.6942, 44.7985)).await.unwrap_err();
        match err {
            EngineError::TooFar { distance_meters, max_meters } => {
                assert!((80..=86).contains(&distance_meters), "got {}", distance_meters);
                assert_eq!(max_meters, 50);
            }
            other => panic!("expected TooFar, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gps_without_coordinates_is_invalid() {
        let f = fixture().await;
        let mut request = gps_request(0.0, 0.0);
        request.proof.coordinates = None;
        assert!(matches!(
            f.validator.validate(&request).await,
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_gps_rejects_unusable_coordinates() {
        let f = fixture().await;
        let cases = [
            (f64::NAN, f64::NAN),
            (41.6942, f64::NAN),
            (f64::INFINITY, 0.0),
            (41.6942, f64::NEG_INFINITY),
            (91.0, 44.7975),
            (41.6942, 224.7975),
        ];
        for (lat, lon) in cases {
            match f.validator.validate(&gps_request(lat, lon)).await {
                Err(EngineError::InvalidInput(_)) => {}
                other => panic!("({}, {}): expected InvalidInput, got {:?}", lat, lon, other),
            }
        }
        assert_eq!(f.store.visit_count().await, 0);
    }

    #[tokio::test]
    async fn test_qr_must_match() {
        let f = fixture().await;
        let mut request = VisitRequest {
            user_id: "u1".into(),
            venue: VenueRef::Id("v1".into()),
            method: VerificationMethod::Qr,
            proof: VisitProof {
                qr_code: Some("QR-WRONG".into()),
                coordinates: None,
            },
        };
        assert!(matches!(f.validator.validate(&request).await, Err(EngineError::QrInvalid)));

        request.proof.qr_code = Some("QR-KHAREBA".into());
        assert!(f.validator.validate(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_resolves_by_qr_code() {
        let f = fixture().await;
        let request = VisitRequest {
            user_id: "u1".into(),
            venue: VenueRef::QrCode("QR-KHAREBA".into()),
            method: VerificationMethod::Qr,
            proof: VisitProof::default(),
        };
        assert_eq!(f.validator.validate(&request).await.unwrap().venue_id, "v1");

        let unknown = VisitRequest {
            venue: VenueRef::QrCode("QR-NOPE".into()),
            ..request
        };
        assert!(matches!(f.validator.validate(&unknown).await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inactive_venue_is_not_found() {
        let f = fixture().await;
        let mut venue = f.store.by_id("v1").await.unwrap().unwrap();
        venue.active = false;
        f.store.put_venue(venue).await;

        let request = VisitRequest {
            user_id: "u1".into(),
            venue: VenueRef::Id("v1".into()),
            method: VerificationMethod::Manual,
            proof: VisitProof::default(),
        };
        assert!(matches!(f.validator.validate(&request).await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cooldown_reports_remaining_minutes() {
        let f = fixture().await;
        let first = f.validator.validate(&gps_request(41.6942, 44.7975)).await.unwrap();
        let since = first.occurred_at - Duration::hours(24);
        assert_eq!(f.store.append(&first, since).await.unwrap(), AppendOutcome::Recorded);

        f.clock.advance(Duration::hours(23) + Duration::minutes(59));
        match f.validator.validate(&gps_request(41.6942, 44.7975)).await {
            Err(EngineError::CooldownActive { remaining_minutes }) => assert_eq!(remaining_minutes, 1),
            other => panic!("expected CooldownActive, got {:?}", other),
        }

        f.clock.advance(Duration::minutes(2));
        assert!(f.validator.validate(&gps_request(41.6942, 44.7975)).await.is_ok());
    }
}
