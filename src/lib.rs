//! Stamp Engine - proof-of-visit verification and challenge completion
//!
//! Records a user's check-in at a venue, verifies it (QR code, GPS proximity
//! or manual), enforces a per-venue cooldown and a per-user rate limit, and
//! awards challenges and rewards once their requirements are met.
//!
//! ## Flow
//!
//! ```text
//! VisitRequest
//!   → ProofOfVisitValidator   rate limit, venue, QR/GPS, cooldown
//!   → VisitLedger::append     atomic cooldown guard
//!   → matcher                 progress per active challenge
//!   → RewardIssuer            at most one reward per (user, challenge)
//!   → CompletionResult
//! ```
//!
//! ## Storage
//!
//! The engine only sees the traits in [`store`]. Two backends ship with the
//! crate:
//!
//! - [`store::MemoryStore`] - in-process, used by tests and embedders
//! - [`db::EngineDb`] - SQLite via rusqlite, used by the `stampd` binary
//!
//! ```text
//! ~/.local/share/stamp-engine/
//! ├── stamps.db       # venues, challenges, visits, rewards, XP, badges
//! └── config.toml     # Configuration
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineSettings};
pub use db::EngineDb;
pub use engine::{
    ChallengeCompletionOrchestrator, CompletionResult, Engine, EngineEvent, EventBus,
    IssueOutcome, ProofOfVisitValidator, ReconcileReport, RewardIssuer, UserProgressReport,
};
pub use error::EngineError;
pub use geo::Coordinates;
pub use models::*;
pub use store::{MemoryStore, Stores};
