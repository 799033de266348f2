//! Domain types shared by the engine and its stores
//!
//! Enum string forms double as their SQLite TEXT encoding, so `as_str` and
//! `FromStr` must stay in sync with the serde names.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::geo::Coordinates;

// ============================================================================
// Venues
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueType {
    Restaurant,
    Winery,
    Guesthouse,
    CookingStudio,
}

impl VenueType {
    pub const ALL: [VenueType; 4] = [
        VenueType::Restaurant,
        VenueType::Winery,
        VenueType::Guesthouse,
        VenueType::CookingStudio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueType::Restaurant => "restaurant",
            VenueType::Winery => "winery",
            VenueType::Guesthouse => "guesthouse",
            VenueType::CookingStudio => "cooking_studio",
        }
    }
}

impl FromStr for VenueType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VenueType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EngineError::InvalidInput(format!("Unknown venue type: {}", s)))
    }
}

impl fmt::Display for VenueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stampable venue. Owned by the venue directory, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub venue_type: VenueType,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    pub region: String,
    pub coordinates: Coordinates,
    pub qr_code: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// How the caller identifies the venue being visited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueRef {
    Id(String),
    QrCode(String),
}

// ============================================================================
// Visits
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Gps,
    Qr,
    Manual,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::Gps => "gps",
            VerificationMethod::Qr => "qr",
            VerificationMethod::Manual => "manual",
        }
    }

    /// GPS and QR visits carry physical proof
    pub fn is_verified(&self) -> bool {
        !matches!(self, VerificationMethod::Manual)
    }
}

impl FromStr for VerificationMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gps" => Ok(VerificationMethod::Gps),
            "qr" => Ok(VerificationMethod::Qr),
            "manual" => Ok(VerificationMethod::Manual),
            other => Err(EngineError::InvalidInput(format!(
                "Unknown verification method: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence attached to a visit request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitProof {
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

/// Incoming visit request from an authenticated user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRequest {
    pub user_id: String,
    pub venue: VenueRef,
    pub method: VerificationMethod,
    #[serde(default)]
    pub proof: VisitProof,
}

/// A recorded stamp. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub id: String,
    pub user_id: String,
    pub venue_id: String,
    pub occurred_at: DateTime<Utc>,
    pub coordinates: Option<Coordinates>,
    pub verification_method: VerificationMethod,
}

/// Visit joined with the venue it was made at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitWithVenue {
    pub visit: VisitEvent,
    pub venue: Venue,
}

// ============================================================================
// Challenges
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Simple,
    Combo,
}

/// Direct visit-count requirements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleRequirements {
    #[serde(default)]
    pub venue_types: BTreeSet<VenueType>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub regions: BTreeSet<String>,
    /// Allowlist of venue ids. When non-empty it replaces the other predicates.
    #[serde(default)]
    pub required_venues: BTreeSet<String>,
    pub min_stamps: u32,
}

/// Completion of other challenges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboRequirements {
    pub required_challenge_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requirements {
    Simple(SimpleRequirements),
    Combo(ComboRequirements),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    Badge,
    Discount,
    FreeTasting,
    Souvenir,
}

impl RewardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardKind::Badge => "badge",
            RewardKind::Discount => "discount",
            RewardKind::FreeTasting => "free_tasting",
            RewardKind::Souvenir => "souvenir",
        }
    }
}

impl FromStr for RewardKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "badge" => Ok(RewardKind::Badge),
            "discount" => Ok(RewardKind::Discount),
            "free_tasting" => Ok(RewardKind::FreeTasting),
            "souvenir" => Ok(RewardKind::Souvenir),
            other => Err(EngineError::InvalidInput(format!("Unknown reward kind: {}", other))),
        }
    }
}

/// What a challenge pays out on completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSpec {
    pub kind: RewardKind,
    pub value: String,
    /// Days until an issued reward expires. None never expires.
    #[serde(default)]
    pub valid_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    pub requirements: Requirements,
    pub reward: RewardSpec,
    #[serde(default)]
    pub xp_reward: i64,
}

impl ChallengeDefinition {
    pub fn kind(&self) -> ChallengeKind {
        match self.requirements {
            Requirements::Simple(_) => ChallengeKind::Simple,
            Requirements::Combo(_) => ChallengeKind::Combo,
        }
    }

    /// Check the structural invariants of the definition
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidInput("Challenge id is required".into()));
        }
        if self.xp_reward < 0 {
            return Err(EngineError::InvalidInput(format!(
                "Challenge {}: xp_reward must not be negative",
                self.id
            )));
        }

        match &self.requirements {
            Requirements::Simple(simple) => {
                if simple.min_stamps < 1 {
                    return Err(EngineError::InvalidInput(format!(
                        "Challenge {}: min_stamps must be at least 1",
                        self.id
                    )));
                }
            }
            Requirements::Combo(combo) => {
                if combo.required_challenge_ids.is_empty() {
                    return Err(EngineError::InvalidInput(format!(
                        "Challenge {}: combo requires at least one challenge",
                        self.id
                    )));
                }
                let mut seen = HashSet::new();
                for id in &combo.required_challenge_ids {
                    if id == &self.id {
                        return Err(EngineError::InvalidInput(format!(
                            "Challenge {}: combo cannot require itself",
                            self.id
                        )));
                    }
                    if !seen.insert(id.as_str()) {
                        return Err(EngineError::InvalidInput(format!(
                            "Challenge {}: duplicate required challenge {}",
                            self.id, id
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Rewards and users
// ============================================================================

/// At most one per (user_id, challenge_id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub id: String,
    pub user_id: String,
    pub challenge_id: String,
    pub kind: RewardKind,
    pub value: String,
    pub redeemed: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Reward record plus the side effects that must land with it
#[derive(Debug, Clone)]
pub struct RewardGrant {
    pub record: RewardRecord,
    pub xp: i64,
    pub badge: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub xp: i64,
    pub badges: BTreeSet<String>,
}

impl UserProfile {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }
}

/// Venues and challenges imported in one go
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub venues: Vec<Venue>,
    #[serde(default)]
    pub challenges: Vec<ChallengeDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo(id: &str, required: &[&str]) -> ChallengeDefinition {
        ChallengeDefinition {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            active: true,
            requirements: Requirements::Combo(ComboRequirements {
                required_challenge_ids: required.iter().map(|s| s.to_string()).collect(),
            }),
            reward: RewardSpec {
                kind: RewardKind::Badge,
                value: "combo".into(),
                valid_days: None,
            },
            xp_reward: 50,
        }
    }

    #[test]
    fn test_requirements_tagged_json() {
        let json = r#"{
            "id": "wine-3",
            "name": "Wine Trail",
            "requirements": {"kind": "simple", "categories": ["wine"], "min_stamps": 3},
            "reward": {"kind": "free_tasting", "value": "1 glass"},
            "xp_reward": 100
        }"#;
        let def: ChallengeDefinition = serde_json::from_str(json).unwrap();
        assert!(def.active);
        assert_eq!(def.kind(), ChallengeKind::Simple);
        match &def.requirements {
            Requirements::Simple(s) => {
                assert_eq!(s.min_stamps, 3);
                assert!(s.categories.contains("wine"));
                assert!(s.required_venues.is_empty());
            }
            Requirements::Combo(_) => panic!("expected simple requirements"),
        }
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_simple_requires_min_stamps() {
        let json = r#"{"kind": "simple", "categories": ["wine"]}"#;
        assert!(serde_json::from_str::<Requirements>(json).is_err());

        let mut def = combo("c", &["a"]);
        def.requirements = Requirements::Simple(SimpleRequirements::default());
        assert!(matches!(def.validate(), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_combo_validation() {
        assert!(combo("c", &["a", "b"]).validate().is_ok());
        assert!(combo("c", &[]).validate().is_err());
        assert!(combo("c", &["a", "a"]).validate().is_err());
        assert!(combo("c", &["a", "c"]).validate().is_err());
    }

    #[test]
    fn test_enum_string_forms() {
        for t in VenueType::ALL {
            assert_eq!(t.as_str().parse::<VenueType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert_eq!("free_tasting".parse::<RewardKind>().unwrap(), RewardKind::FreeTasting);
        assert!("pizza".parse::<VerificationMethod>().is_err());
        assert!(VerificationMethod::Qr.is_verified());
        assert!(!VerificationMethod::Manual.is_verified());
    }
}
