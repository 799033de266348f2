//! Engine layer for stamp-engine
//!
//! Components encapsulate the verification and reward rules between callers
//! and the store traits:
//! - Rate limiting and proof-of-visit validation
//! - Challenge matching (pure)
//! - Idempotent reward issuance
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! Callers (CLI, outer API layer)
//!     ↓
//! ChallengeCompletionOrchestrator
//!     ↓                  ↓
//! ProofOfVisitValidator  RewardIssuer
//!     ↓                  ↓
//! Store traits (store/*.rs): MemoryStore or EngineDb
//! ```

pub mod events;
pub mod issuer;
pub mod matcher;
pub mod orchestrator;
pub mod rate_limit;
pub mod validator;

// Re-exports
pub use events::{spawn_logging_listener, EngineEvent, EventBus, EventListener};
pub use issuer::{IssueOutcome, RewardIssuer};
pub use matcher::{ChallengeProgress, UserProgressView};
pub use orchestrator::{
    ChallengeCompletionOrchestrator, CompletionResult, ReconcileReport, UnlockedReward,
    UserProgressReport,
};
pub use rate_limit::{RateLimitConfig, VisitRateLimiter};
pub use validator::ProofOfVisitValidator;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::models::{RewardRecord, VisitRequest};
use crate::store::Stores;

/// Component container for dependency injection
///
/// Holds every engine component wired to one set of stores and one event bus.
pub struct Engine {
    pub validator: Arc<ProofOfVisitValidator>,
    pub issuer: Arc<RewardIssuer>,
    pub orchestrator: Arc<ChallengeCompletionOrchestrator>,
    pub events: Arc<EventBus>,
    pub stores: Stores,
}

impl Engine {
    /// Wire all components over `stores`
    pub fn new(stores: Stores, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        let events = Arc::new(EventBus::new());

        let validator = Arc::new(ProofOfVisitValidator::new(
            stores.venues.clone(),
            stores.ledger.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let issuer = Arc::new(RewardIssuer::new(stores.rewards.clone(), clock, events.clone()));
        let orchestrator = Arc::new(ChallengeCompletionOrchestrator::new(
            validator.clone(),
            issuer.clone(),
            stores.clone(),
            events.clone(),
            settings,
        ));

        Self {
            validator,
            issuer,
            orchestrator,
            events,
            stores,
        }
    }

    /// Wire all components against the wall clock
    pub fn with_system_clock(stores: Stores, settings: EngineSettings) -> Self {
        Self::new(stores, Arc::new(SystemClock), settings)
    }

    pub async fn record_visit(&self, request: VisitRequest) -> Result<CompletionResult, EngineError> {
        self.orchestrator.record_visit(request).await
    }

    pub async fn progress(&self, user_id: &str) -> Result<UserProgressReport, EngineError> {
        self.orchestrator.progress(user_id).await
    }

    pub async fn reconcile(&self, user_id: &str) -> Result<ReconcileReport, EngineError> {
        self.orchestrator.reconcile(user_id).await
    }

    pub async fn redeem(&self, user_id: &str, reward_id: &str) -> Result<RewardRecord, EngineError> {
        self.issuer.redeem(user_id, reward_id).await
    }
}
