//! Visit recording and challenge completion
//!
//! A visit moves through Validating, Recording, Evaluating and Rewarding.
//! Once the ledger write succeeds the visit stands: later failures are logged,
//! surfaced as `evaluation_complete = false`, and can be repaired with
//! [`ChallengeCompletionOrchestrator::reconcile`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::events::{EngineEvent, EventBus};
use super::issuer::{IssueOutcome, RewardIssuer};
use super::matcher::{self, ChallengeProgress, UserProgressView};
use super::validator::ProofOfVisitValidator;
use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::models::{
    ChallengeDefinition, RewardKind, RewardRecord, UserProfile, VisitEvent, VisitRequest,
};
use crate::store::{AppendOutcome, Stores};

/// Reward summary returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockedReward {
    pub kind: RewardKind,
    pub value: String,
}

/// Result of a successful `record_visit`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResult {
    pub visit: VisitEvent,
    /// Names of challenges completed by this visit
    pub challenges_completed: Vec<String>,
    pub rewards_unlocked: Vec<UnlockedReward>,
    pub xp_gained: i64,
    /// False when the visit was recorded but evaluation or rewarding failed
    pub evaluation_complete: bool,
}

/// Read-only progress for one user
#[derive(Debug, Clone, Serialize)]
pub struct UserProgressReport {
    pub profile: UserProfile,
    pub challenges: Vec<ChallengeProgress>,
    pub completed_challenge_ids: Vec<String>,
    pub rewards: Vec<RewardRecord>,
}

/// Rewards issued by a reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub user_id: String,
    pub challenges_completed: Vec<String>,
    pub rewards_unlocked: Vec<UnlockedReward>,
    pub xp_gained: i64,
}

/// Rewards accumulated during one Evaluating + Rewarding pass
#[derive(Debug, Default)]
struct RewardRun {
    completed: Vec<String>,
    unlocked: Vec<UnlockedReward>,
    xp: i64,
}

impl RewardRun {
    fn record(&mut self, definition: &ChallengeDefinition, reward: &RewardRecord) {
        self.completed.push(definition.name.clone());
        self.unlocked.push(UnlockedReward {
            kind: reward.kind,
            value: reward.value.clone(),
        });
        self.xp += definition.xp_reward;
    }
}

pub struct ChallengeCompletionOrchestrator {
    validator: Arc<ProofOfVisitValidator>,
    issuer: Arc<RewardIssuer>,
    stores: Stores,
    events: Arc<EventBus>,
    settings: EngineSettings,
}

impl ChallengeCompletionOrchestrator {
    pub fn new(
        validator: Arc<ProofOfVisitValidator>,
        issuer: Arc<RewardIssuer>,
        stores: Stores,
        events: Arc<EventBus>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            validator,
            issuer,
            stores,
            events,
            settings,
        }
    }

    /// Validate, record and reward a single check-in
    pub async fn record_visit(&self, request: VisitRequest) -> Result<CompletionResult, EngineError> {
        let user_id = request.user_id.clone();

        let visit = match self.validator.validate(&request).await {
            Ok(visit) => visit,
            Err(e) => return Err(self.rejected(&user_id, e)),
        };

        let since = visit.occurred_at - self.settings.cooldown();
        match self.stores.ledger.append(&visit, since).await {
            Ok(AppendOutcome::Recorded) => {}
            Ok(AppendOutcome::CooldownConflict(previous)) => {
                // A concurrent request for the same venue won the write
                let err = self.validator.cooldown_error(&previous, visit.occurred_at);
                return Err(self.rejected(&user_id, err));
            }
            Err(e) => return Err(self.rejected(&user_id, e)),
        }

        info!(
            user_id = %user_id,
            venue_id = %visit.venue_id,
            method = %visit.verification_method,
            "Visit recorded"
        );
        self.events.emit(EngineEvent::VisitRecorded {
            visit_id: visit.id.clone(),
            user_id: user_id.clone(),
            venue_id: visit.venue_id.clone(),
            method: visit.verification_method,
        });

        let mut result = CompletionResult {
            visit,
            challenges_completed: Vec::new(),
            rewards_unlocked: Vec::new(),
            xp_gained: 0,
            evaluation_complete: true,
        };

        match self.stores.users.add_xp(&user_id, self.settings.base_visit_xp).await {
            Ok(_) => result.xp_gained += self.settings.base_visit_xp,
            Err(e) => {
                self.incomplete(&user_id, &e);
                result.evaluation_complete = false;
            }
        }

        let mut run = RewardRun::default();
        if let Err(e) = self.evaluate_and_reward(&user_id, &mut run).await {
            self.incomplete(&user_id, &e);
            result.evaluation_complete = false;
        }

        result.challenges_completed = run.completed;
        result.rewards_unlocked = run.unlocked;
        result.xp_gained += run.xp;

        Ok(result)
    }

    /// Current progress against every active challenge
    pub async fn progress(&self, user_id: &str) -> Result<UserProgressReport, EngineError> {
        let definitions = self.stores.catalog.active_definitions().await?;
        let rewards = self.stores.rewards.list_for_user(user_id).await?;
        let view = self.load_view(user_id, &rewards).await?;
        let profile = self.stores.users.profile(user_id).await?;

        let mut completed_challenge_ids: Vec<String> = view.rewarded.iter().cloned().collect();
        completed_challenge_ids.sort();

        Ok(UserProgressReport {
            profile,
            challenges: matcher::evaluate_all(&definitions, &view),
            completed_challenge_ids,
            rewards,
        })
    }

    /// Re-run evaluation and rewarding without recording a visit
    pub async fn reconcile(&self, user_id: &str) -> Result<ReconcileReport, EngineError> {
        let mut run = RewardRun::default();
        self.evaluate_and_reward(user_id, &mut run).await?;

        if run.completed.is_empty() {
            debug!(user_id = %user_id, "Reconcile found nothing to issue");
        } else {
            info!(user_id = %user_id, issued = run.completed.len(), "Reconcile issued missing rewards");
        }

        Ok(ReconcileReport {
            user_id: user_id.to_string(),
            challenges_completed: run.completed,
            rewards_unlocked: run.unlocked,
            xp_gained: run.xp,
        })
    }

    /// Evaluating + Rewarding. Issued rewards are pushed into `run` as they
    /// land so a failure part way through still reports what was issued.
    async fn evaluate_and_reward(&self, user_id: &str, run: &mut RewardRun) -> Result<(), EngineError> {
        let definitions = self.stores.catalog.active_definitions().await?;
        let rewards = self.stores.rewards.list_for_user(user_id).await?;
        let mut view = self.load_view(user_id, &rewards).await?;

        // Visits do not change between rounds, so only combos can become
        // satisfied after the first round. Each round adds at least one id to
        // `rewarded`, which bounds the loop by the number of definitions.
        loop {
            let pending: Vec<&ChallengeDefinition> = definitions
                .iter()
                .filter(|d| matcher::evaluate(d, &view).satisfied_now)
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            for definition in pending {
                match self.issuer.issue(user_id, definition).await? {
                    IssueOutcome::Issued(record) => run.record(definition, &record),
                    IssueOutcome::AlreadyIssued(_) => {}
                }
                view.rewarded.insert(definition.id.clone());
            }
        }
    }

    async fn load_view(
        &self,
        user_id: &str,
        rewards: &[RewardRecord],
    ) -> Result<UserProgressView, EngineError> {
        let visits = self.stores.ledger.find_by_user(user_id).await?;
        let rewarded = rewards.iter().map(|r| r.challenge_id.clone()).collect();
        let view = UserProgressView::new(visits, rewarded);

        if self.settings.count_manual_visits {
            Ok(view)
        } else {
            Ok(view.verified_only())
        }
    }

    fn rejected(&self, user_id: &str, err: EngineError) -> EngineError {
        debug!(user_id = %user_id, reason = err.code(), error = %err, "Visit rejected");
        self.events.emit(EngineEvent::VisitRejected {
            user_id: user_id.to_string(),
            reason: err.code(),
        });
        err
    }

    fn incomplete(&self, user_id: &str, err: &EngineError) {
        warn!(user_id = %user_id, error = %err, "Visit recorded but challenge evaluation failed");
        self.events.emit(EngineEvent::EvaluationIncomplete {
            user_id: user_id.to_string(),
            error: err.to_string(),
        });
    }
}
