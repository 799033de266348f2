//! Collaborator interfaces consumed by the engine
//!
//! The engine never talks to a database directly. Venues, the visit ledger,
//! rewards, challenge definitions and user XP are reached through these
//! traits, implemented by [`MemoryStore`] and by [`crate::db::EngineDb`].
//!
//! Every mutation is a single store call that either fully applies or does
//! not apply at all:
//!
//! - [`VisitLedger::append`] checks the cooldown window and inserts atomically
//! - [`RewardStore::create`] inserts the record, XP and badge atomically and
//!   refuses a second record for the same (user, challenge)

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::models::{
    ChallengeDefinition, RewardGrant, RewardRecord, UserProfile, Venue, VisitEvent, VisitWithVenue,
};

pub use memory::MemoryStore;

/// Result of an atomic ledger append
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Recorded,
    /// Another visit already sits inside the cooldown window
    CooldownConflict(VisitEvent),
}

/// Result of an atomic reward creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(RewardRecord),
    /// (user, challenge) already had a record; nothing was applied
    Duplicate(RewardRecord),
}

#[async_trait]
pub trait VenueLookup: Send + Sync {
    async fn by_id(&self, id: &str) -> Result<Option<Venue>, EngineError>;
    async fn by_qr_code(&self, code: &str) -> Result<Option<Venue>, EngineError>;
}

/// Append-only visit store
#[async_trait]
pub trait VisitLedger: Send + Sync {
    /// Insert `event` unless the same user already has a verified (GPS or QR)
    /// visit at the same venue strictly after `cooldown_since`. Manual
    /// check-ins are recorded but never start a cooldown.
    async fn append(
        &self,
        event: &VisitEvent,
        cooldown_since: DateTime<Utc>,
    ) -> Result<AppendOutcome, EngineError>;

    /// All visits of a user with their venue, oldest first
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<VisitWithVenue>, EngineError>;

    /// Most recent verified visit strictly after `since`
    async fn find_by_user_and_venue_since(
        &self,
        user_id: &str,
        venue_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<VisitEvent>, EngineError>;
}

#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn find(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Option<RewardRecord>, EngineError>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<RewardRecord>, EngineError>;

    async fn create(&self, grant: RewardGrant) -> Result<CreateOutcome, EngineError>;

    /// Mark a reward redeemed. Fails with `NotFound`, `AlreadyExists` or
    /// `RewardExpired`.
    async fn redeem(
        &self,
        user_id: &str,
        reward_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RewardRecord, EngineError>;
}

#[async_trait]
pub trait ChallengeCatalog: Send + Sync {
    async fn active_definitions(&self) -> Result<Vec<ChallengeDefinition>, EngineError>;
}

#[async_trait]
pub trait UserStats: Send + Sync {
    /// Increment XP and return the new balance
    async fn add_xp(&self, user_id: &str, amount: i64) -> Result<i64, EngineError>;

    async fn profile(&self, user_id: &str) -> Result<UserProfile, EngineError>;
}

/// Shared handles to every collaborator
#[derive(Clone)]
pub struct Stores {
    pub venues: Arc<dyn VenueLookup>,
    pub ledger: Arc<dyn VisitLedger>,
    pub rewards: Arc<dyn RewardStore>,
    pub catalog: Arc<dyn ChallengeCatalog>,
    pub users: Arc<dyn UserStats>,
}

impl Stores {
    /// Use one backend for every collaborator
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: VenueLookup + VisitLedger + RewardStore + ChallengeCatalog + UserStats + 'static,
    {
        Self {
            venues: backend.clone(),
            ledger: backend.clone(),
            rewards: backend.clone(),
            catalog: backend.clone(),
            users: backend,
        }
    }
}

/// Shared redemption rules for store implementations
pub(crate) fn check_redeemable(
    record: &RewardRecord,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if record.user_id != user_id {
        return Err(EngineError::NotFound(format!("Reward {}", record.id)));
    }
    if record.redeemed {
        return Err(EngineError::AlreadyExists(format!(
            "Reward {} was already redeemed",
            record.id
        )));
    }
    if let Some(expires_at) = record.expires_at {
        if expires_at <= now {
            return Err(EngineError::RewardExpired(format!(
                "Reward {} expired at {}",
                record.id,
                expires_at.to_rfc3339()
            )));
        }
    }
    Ok(())
}
