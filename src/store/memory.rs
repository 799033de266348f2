//! In-process store for tests and embedded use
//!
//! All state sits behind one `RwLock`, so every trait mutation is atomic with
//! respect to concurrent requests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    check_redeemable, AppendOutcome, ChallengeCatalog, CreateOutcome, RewardStore, UserStats,
    VenueLookup, VisitLedger,
};
use crate::error::EngineError;
use crate::models::{
    Catalog, ChallengeDefinition, RewardGrant, RewardRecord, UserProfile, Venue, VisitEvent,
    VisitWithVenue,
};

#[derive(Default)]
struct MemoryState {
    venues: HashMap<String, Venue>,
    challenges: Vec<ChallengeDefinition>,
    visits: Vec<VisitEvent>,
    /// (user_id, challenge_id) -> reward
    rewards: HashMap<(String, String), RewardRecord>,
    xp: HashMap<String, i64>,
    badges: HashMap<String, BTreeSet<String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a venue
    pub async fn put_venue(&self, venue: Venue) {
        let mut state = self.state.write().await;
        state.venues.insert(venue.id.clone(), venue);
    }

    /// Insert or replace a challenge definition after validating it
    pub async fn put_challenge(&self, definition: ChallengeDefinition) -> Result<(), EngineError> {
        definition.validate()?;
        let mut state = self.state.write().await;
        state.challenges.retain(|c| c.id != definition.id);
        state.challenges.push(definition);
        Ok(())
    }

    pub async fn import_catalog(&self, catalog: Catalog) -> Result<(), EngineError> {
        for definition in &catalog.challenges {
            definition.validate()?;
        }
        for venue in catalog.venues {
            self.put_venue(venue).await;
        }
        for definition in catalog.challenges {
            self.put_challenge(definition).await?;
        }
        Ok(())
    }

    /// Number of recorded visits across all users
    pub async fn visit_count(&self) -> usize {
        self.state.read().await.visits.len()
    }

    /// Number of reward records across all users
    pub async fn reward_count(&self) -> usize {
        self.state.read().await.rewards.len()
    }
}

/// Most recent verified visit strictly after `since`
fn latest_verified_since<'a>(
    visits: &'a [VisitEvent],
    user_id: &str,
    venue_id: &str,
    since: DateTime<Utc>,
) -> Option<&'a VisitEvent> {
    visits
        .iter()
        .filter(|v| v.user_id == user_id && v.venue_id == venue_id && v.occurred_at > since)
        .filter(|v| v.verification_method.is_verified())
        .max_by_key(|v| v.occurred_at)
}

#[async_trait]
impl VenueLookup for MemoryStore {
    async fn by_id(&self, id: &str) -> Result<Option<Venue>, EngineError> {
        Ok(self.state.read().await.venues.get(id).cloned())
    }

    async fn by_qr_code(&self, code: &str) -> Result<Option<Venue>, EngineError> {
        let state = self.state.read().await;
        Ok(state.venues.values().find(|v| v.qr_code == code).cloned())
    }
}

#[async_trait]
impl VisitLedger for MemoryStore {
    async fn append(
        &self,
        event: &VisitEvent,
        cooldown_since: DateTime<Utc>,
    ) -> Result<AppendOutcome, EngineError> {
        let mut state = self.state.write().await;

        if let Some(existing) =
            latest_verified_since(&state.visits, &event.user_id, &event.venue_id, cooldown_since)
        {
            debug!(user_id = %event.user_id, venue_id = %event.venue_id, "Cooldown conflict on append");
            return Ok(AppendOutcome::CooldownConflict(existing.clone()));
        }

        state.visits.push(event.clone());
        Ok(AppendOutcome::Recorded)
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<VisitWithVenue>, EngineError> {
        let state = self.state.read().await;
        let mut visits: Vec<VisitWithVenue> = state
            .visits
            .iter()
            .filter(|v| v.user_id == user_id)
            .filter_map(|v| {
                state.venues.get(&v.venue_id).map(|venue| VisitWithVenue {
                    visit: v.clone(),
                    venue: venue.clone(),
                })
            })
            .collect();
        visits.sort_by_key(|v| v.visit.occurred_at);
        Ok(visits)
    }

    async fn find_by_user_and_venue_since(
        &self,
        user_id: &str,
        venue_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<VisitEvent>, EngineError> {
        let state = self.state.read().await;
        Ok(latest_verified_since(&state.visits, user_id, venue_id, since).cloned())
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn find(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Option<RewardRecord>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .rewards
            .get(&(user_id.to_string(), challenge_id.to_string()))
            .cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RewardRecord>, EngineError> {
        let state = self.state.read().await;
        let mut rewards: Vec<RewardRecord> = state
            .rewards
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rewards.sort_by_key(|r| r.issued_at);
        Ok(rewards)
    }

    async fn create(&self, grant: RewardGrant) -> Result<CreateOutcome, EngineError> {
        let mut state = self.state.write().await;
        let key = (grant.record.user_id.clone(), grant.record.challenge_id.clone());

        if let Some(existing) = state.rewards.get(&key) {
            return Ok(CreateOutcome::Duplicate(existing.clone()));
        }

        let user_id = grant.record.user_id.clone();
        state.rewards.insert(key, grant.record.clone());
        *state.xp.entry(user_id.clone()).or_insert(0) += grant.xp;
        if let Some(badge) = grant.badge {
            state.badges.entry(user_id).or_default().insert(badge);
        }

        Ok(CreateOutcome::Created(grant.record))
    }

    async fn redeem(
        &self,
        user_id: &str,
        reward_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RewardRecord, EngineError> {
        let mut state = self.state.write().await;
        let record = state
            .rewards
            .values_mut()
            .find(|r| r.id == reward_id)
            .ok_or_else(|| EngineError::NotFound(format!("Reward {}", reward_id)))?;

        check_redeemable(record, user_id, now)?;
        record.redeemed = true;
        Ok(record.clone())
    }
}

#[async_trait]
impl ChallengeCatalog for MemoryStore {
    async fn active_definitions(&self) -> Result<Vec<ChallengeDefinition>, EngineError> {
        let state = self.state.read().await;
        Ok(state.challenges.iter().filter(|c| c.active).cloned().collect())
    }
}

#[async_trait]
impl UserStats for MemoryStore {
    async fn add_xp(&self, user_id: &str, amount: i64) -> Result<i64, EngineError> {
        let mut state = self.state.write().await;
        let xp = state.xp.entry(user_id.to_string()).or_insert(0);
        *xp += amount;
        Ok(*xp)
    }

    async fn profile(&self, user_id: &str) -> Result<UserProfile, EngineError> {
        let state = self.state.read().await;
        Ok(UserProfile {
            user_id: user_id.to_string(),
            xp: state.xp.get(user_id).copied().unwrap_or(0),
            badges: state.badges.get(user_id).cloned().unwrap_or_default(),
        })
    }
}
