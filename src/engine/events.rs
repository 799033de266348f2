//! Event system for engine operations
//!
//! Provides an event bus for notifying listeners about stamps and rewards.
//! Useful for:
//! - Audit logging
//! - Push notifications (delivered by an outer layer)
//! - Leaderboard refresh triggers

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::models::{RewardKind, VerificationMethod};

/// Engine events emitted by the orchestrator and issuer
#[derive(Debug, Clone)]
pub enum EngineEvent {
    VisitRecorded {
        visit_id: String,
        user_id: String,
        venue_id: String,
        method: VerificationMethod,
    },
    VisitRejected {
        user_id: String,
        reason: &'static str,
    },
    ChallengeCompleted {
        user_id: String,
        challenge_id: String,
        name: String,
    },
    RewardIssued {
        reward_id: String,
        user_id: String,
        challenge_id: String,
        kind: RewardKind,
        value: String,
    },
    RewardRedeemed {
        reward_id: String,
        user_id: String,
    },
    /// Visit stands but challenge evaluation did not finish
    EvaluationIncomplete {
        user_id: String,
        error: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Event bus for broadcasting engine events
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: EngineEvent) {
        trace!(event = ?event, "Emitting engine event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::VisitRecorded { user_id, venue_id, method, .. } => {
                debug!(user_id = %user_id, venue_id = %venue_id, method = %method, "Visit recorded");
            }
            EngineEvent::ChallengeCompleted { user_id, challenge_id, name } => {
                info!(user_id = %user_id, challenge_id = %challenge_id, name = %name, "Challenge completed");
            }
            EngineEvent::RewardIssued { user_id, challenge_id, kind, .. } => {
                info!(user_id = %user_id, challenge_id = %challenge_id, kind = kind.as_str(), "Reward issued");
            }
            EngineEvent::EvaluationIncomplete { user_id, error } => {
                warn!(user_id = %user_id, error = %error, "Challenge evaluation incomplete");
            }
            _ => {
                trace!(event = ?event, "Engine event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
