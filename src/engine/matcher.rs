//! Challenge matching
//!
//! Pure functions over a [`UserProgressView`]. Nothing here touches a store,
//! so progress can be recomputed at any time from the ledger and reward set.

use std::collections::HashSet;

use serde::Serialize;

use crate::models::{
    ChallengeDefinition, ComboRequirements, Requirements, SimpleRequirements, Venue,
    VerificationMethod, VisitWithVenue,
};

/// A user's visits and completed challenges, assembled per request
#[derive(Debug, Clone, Default)]
pub struct UserProgressView {
    pub visits: Vec<VisitWithVenue>,
    /// Challenge ids the user already holds a reward for
    pub rewarded: HashSet<String>,
}

impl UserProgressView {
    pub fn new(visits: Vec<VisitWithVenue>, rewarded: HashSet<String>) -> Self {
        Self { visits, rewarded }
    }

    /// Drop manual check-ins from the visit history
    pub fn verified_only(mut self) -> Self {
        self.visits
            .retain(|v| v.visit.verification_method != VerificationMethod::Manual);
        self
    }
}

/// Progress of one user against one challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeProgress {
    pub challenge_id: String,
    pub name: String,
    pub current: u32,
    pub required: u32,
    /// 0..=100, for display
    pub percentage: u32,
    pub satisfied: bool,
    pub already_completed: bool,
    /// Satisfied and not yet rewarded
    pub satisfied_now: bool,
}

/// Evaluate a single definition
pub fn evaluate(definition: &ChallengeDefinition, view: &UserProgressView) -> ChallengeProgress {
    let (current, required, satisfied) = match &definition.requirements {
        Requirements::Simple(simple) => {
            let current = count_matching_visits(simple, &view.visits);
            let required = simple.min_stamps;
            (current, required, current >= required)
        }
        Requirements::Combo(combo) => {
            let current = count_completed(combo, &view.rewarded);
            let required = combo.required_challenge_ids.len() as u32;
            (current, required, required > 0 && current >= required)
        }
    };

    let already_completed = view.rewarded.contains(&definition.id);

    ChallengeProgress {
        challenge_id: definition.id.clone(),
        name: definition.name.clone(),
        current,
        required,
        percentage: percentage(current, required),
        satisfied,
        already_completed,
        satisfied_now: satisfied && !already_completed,
    }
}

/// Evaluate a batch of definitions in order
pub fn evaluate_all(
    definitions: &[ChallengeDefinition],
    view: &UserProgressView,
) -> Vec<ChallengeProgress> {
    definitions.iter().map(|d| evaluate(d, view)).collect()
}

/// Whether a venue counts toward simple requirements
pub fn venue_matches(requirements: &SimpleRequirements, venue: &Venue) -> bool {
    // The allowlist replaces every other predicate
    if !requirements.required_venues.is_empty() {
        return requirements.required_venues.contains(&venue.id);
    }

    let type_ok = requirements.venue_types.is_empty()
        || requirements.venue_types.contains(&venue.venue_type);
    let category_ok = requirements.categories.is_empty()
        || !requirements.categories.is_disjoint(&venue.categories);
    let region_ok = requirements.regions.is_empty() || requirements.regions.contains(&venue.region);

    type_ok && category_ok && region_ok
}

fn count_matching_visits(requirements: &SimpleRequirements, visits: &[VisitWithVenue]) -> u32 {
    visits
        .iter()
        .filter(|v| venue_matches(requirements, &v.venue))
        .count() as u32
}

fn count_completed(requirements: &ComboRequirements, rewarded: &HashSet<String>) -> u32 {
    requirements
        .required_challenge_ids
        .iter()
        .filter(|id| rewarded.contains(id.as_str()))
        .count() as u32
}

fn percentage(current: u32, required: u32) -> u32 {
    if required == 0 {
        return 0;
    }
    let pct = (100.0 * f64::from(current) / f64::from(required)).round();
    pct.min(100.0) as u32
}
