//! Reward issuance and redemption
//!
//! Issuance is idempotent per (user, challenge). The `find` lookup is only a
//! fast path; the store's atomic `create` is what guarantees a single record
//! when two requests race.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::events::{EngineEvent, EventBus};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::{ChallengeDefinition, RewardGrant, RewardKind, RewardRecord};
use crate::store::{CreateOutcome, RewardStore};

/// Outcome of [`RewardIssuer::issue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued(RewardRecord),
    /// The user already held a reward for this challenge
    AlreadyIssued(RewardRecord),
}

impl IssueOutcome {
    pub fn record(&self) -> &RewardRecord {
        match self {
            IssueOutcome::Issued(r) | IssueOutcome::AlreadyIssued(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, IssueOutcome::Issued(_))
    }
}

pub struct RewardIssuer {
    rewards: Arc<dyn RewardStore>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl RewardIssuer {
    pub fn new(rewards: Arc<dyn RewardStore>, clock: Arc<dyn Clock>, events: Arc<EventBus>) -> Self {
        Self {
            rewards,
            clock,
            events,
        }
    }

    /// Issue the reward for `challenge` to `user_id` at most once
    pub async fn issue(
        &self,
        user_id: &str,
        challenge: &ChallengeDefinition,
    ) -> Result<IssueOutcome, EngineError> {
        if let Some(existing) = self.rewards.find(user_id, &challenge.id).await? {
            debug!(user_id = %user_id, challenge_id = %challenge.id, "Reward already issued");
            return Ok(IssueOutcome::AlreadyIssued(existing));
        }

        let now = self.clock.now();
        let record = RewardRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            challenge_id: challenge.id.clone(),
            kind: challenge.reward.kind,
            value: challenge.reward.value.clone(),
            redeemed: false,
            issued_at: now,
            expires_at: challenge
                .reward
                .valid_days
                .map(|days| now + Duration::days(i64::from(days))),
        };
        let badge = (challenge.reward.kind == RewardKind::Badge).then(|| challenge.reward.value.clone());

        let grant = RewardGrant {
            record,
            xp: challenge.xp_reward,
            badge,
        };

        match self.rewards.create(grant).await? {
            CreateOutcome::Created(record) => {
                info!(
                    user_id = %user_id,
                    challenge_id = %challenge.id,
                    kind = record.kind.as_str(),
                    xp = challenge.xp_reward,
                    "Reward issued"
                );
                self.events.emit(EngineEvent::ChallengeCompleted {
                    user_id: user_id.to_string(),
                    challenge_id: challenge.id.clone(),
                    name: challenge.name.clone(),
                });
                self.events.emit(EngineEvent::RewardIssued {
                    reward_id: record.id.clone(),
                    user_id: user_id.to_string(),
                    challenge_id: challenge.id.clone(),
                    kind: record.kind,
                    value: record.value.clone(),
                });
                Ok(IssueOutcome::Issued(record))
            }
            CreateOutcome::Duplicate(existing) => {
                debug!(user_id = %user_id, challenge_id = %challenge.id, "Lost reward race, keeping existing record");
                Ok(IssueOutcome::AlreadyIssued(existing))
            }
        }
    }

    /// Mark a reward as redeemed
    pub async fn redeem(&self, user_id: &str, reward_id: &str) -> Result<RewardRecord, EngineError> {
        let record = self.rewards.redeem(user_id, reward_id, self.clock.now()).await?;
        info!(user_id = %user_id, reward_id = %reward_id, "Reward redeemed");
        self.events.emit(EngineEvent::RewardRedeemed {
            reward_id: record.id.clone(),
            user_id: user_id.to_string(),
        });
        Ok(record)
    }

    pub async fn rewards_for(&self, user_id: &str) -> Result<Vec<RewardRecord>, EngineError> {
        self.rewards.list_for_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Requirements, RewardSpec, SimpleRequirements};
    use crate::store::{MemoryStore, UserStats};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    /// Reward store whose lookups never see existing records, as when a
    /// concurrent request commits between `find` and `create`
    struct StaleReads(Arc<MemoryStore>);

    #[async_trait]
    impl RewardStore for StaleReads {
        async fn find(&self, _: &str, _: &str) -> Result<Option<RewardRecord>, EngineError> {
            Ok(None)
        }

        async fn list_for_user(&self, user_id: &str) -> Result<Vec<RewardRecord>, EngineError> {
            self.0.list_for_user(user_id).await
        }

        async fn create(&self, grant: RewardGrant) -> Result<CreateOutcome, EngineError> {
            self.0.create(grant).await
        }

        async fn redeem(
            &self,
            user_id: &str,
            reward_id: &str,
            now: DateTime<Utc>,
        ) -> Result<RewardRecord, EngineError> {
            self.0.redeem(user_id, reward_id, now).await
        }
    }

    fn challenge(kind: RewardKind, valid_days: Option<u32>) -> ChallengeDefinition {
        ChallengeDefinition {
            id: "wine-3".into(),
            name: "Wine Lover".into(),
            description: None,
            active: true,
            requirements: Requirements::Simple(SimpleRequirements {
                min_stamps: 3,
                ..Default::default()
            }),
            reward: RewardSpec {
                kind,
                value: match kind {
                    RewardKind::Badge => "Wine Lover".into(),
                    _ => "10%".into(),
                },
                valid_days,
            },
            xp_reward: 100,
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, RewardIssuer) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()));
        let issuer = RewardIssuer::new(store.clone(), clock.clone(), Arc::new(EventBus::new()));
        (store, clock, issuer)
    }

    #[tokio::test]
    async fn test_issue_once_applies_side_effects_once() {
        let (store, _clock, issuer) = setup();
        let def = challenge(RewardKind::Badge, None);

        let first = issuer.issue("u1", &def).await.unwrap();
        assert!(first.is_new());
        let second = issuer.issue("u1", &def).await.unwrap();
        assert_eq!(second, IssueOutcome::AlreadyIssued(first.record().clone()));

        let profile = store.profile("u1").await.unwrap();
        assert_eq!(profile.xp, 100);
        assert!(profile.badges.contains("Wine Lover"));
        assert_eq!(store.reward_count().await, 1);
    }

    #[tokio::test]
    async fn test_lost_race_returns_existing_record() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()));
        let events = Arc::new(EventBus::new());
        let issuer = RewardIssuer::new(Arc::new(StaleReads(store.clone())), clock, events.clone());
        let mut rx = events.subscribe();
        let def = challenge(RewardKind::Badge, None);

        let winner = issuer.issue("u1", &def).await.unwrap();
        assert!(winner.is_new());
        let loser = issuer.issue("u1", &def).await.unwrap();
        assert_eq!(loser, IssueOutcome::AlreadyIssued(winner.record().clone()));

        assert_eq!(store.reward_count().await, 1);
        assert_eq!(store.profile("u1").await.unwrap().xp, 100);

        // Only the winner announces the completion
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::ChallengeCompleted { .. }));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::RewardIssued { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_discount_has_no_badge_and_expires() {
        let (store, clock, issuer) = setup();
        let def = challenge(RewardKind::Discount, Some(30));

        let record = issuer.issue("u1", &def).await.unwrap().record().clone();
        assert_eq!(record.expires_at, Some(clock.now() + Duration::days(30)));
        assert!(store.profile("u1").await.unwrap().badges.is_empty());
    }

    #[tokio::test]
    async fn test_issue_emits_events() {
        let (_store, _clock, issuer) = setup();
        let mut rx = issuer.events.subscribe();

        issuer.issue("u1", &challenge(RewardKind::Badge, None)).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::ChallengeCompleted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::RewardIssued { .. }));
    }

    #[tokio::test]
    async fn test_redeem_rules() {
        let (_store, clock, issuer) = setup();
        let record = issuer
            .issue("u1", &challenge(RewardKind::Discount, Some(7)))
            .await
            .unwrap()
            .record()
            .clone();

        assert!(matches!(
            issuer.redeem("u2", &record.id).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(issuer.redeem("u1", &record.id).await.unwrap().redeemed);
        assert!(matches!(
            issuer.redeem("u1", &record.id).await,
            Err(EngineError::AlreadyExists(_))
        ));

        let other = ChallengeDefinition {
            id: "other".into(),
            ..challenge(RewardKind::Discount, Some(7))
        };
        let expiring = issuer.issue("u1", &other).await.unwrap().record().clone();
        clock.advance(Duration::days(7));
        assert!(matches!(
            issuer.redeem("u1", &expiring.id).await,
            Err(EngineError::RewardExpired(_))
        ));
    }
}
