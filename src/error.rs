//! Error types for stamp-engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("QR code does not match this venue")]
    QrInvalid,

    #[error("You are {distance_meters}m away from the venue (must be within {max_meters}m)")]
    TooFar { distance_meters: u64, max_meters: u64 },

    #[error("Already stamped here recently, try again in {remaining_minutes} minutes")]
    CooldownActive { remaining_minutes: i64 },

    #[error("Too many visit requests, try again in {retry_after_minutes} minutes")]
    RateLimited { retry_after_minutes: i64 },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Reward expired: {0}")]
    RewardExpired(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for terminal rejections reported verbatim to the caller.
    ///
    /// Infrastructure failures (database, IO, internal) return false.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_)
                | EngineError::QrInvalid
                | EngineError::TooFar { .. }
                | EngineError::CooldownActive { .. }
                | EngineError::RateLimited { .. }
                | EngineError::AlreadyExists(_)
                | EngineError::RewardExpired(_)
                | EngineError::InvalidInput(_)
        )
    }

    /// Short machine-readable code for the variant
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::QrInvalid => "qr_invalid",
            EngineError::TooFar { .. } => "too_far",
            EngineError::CooldownActive { .. } => "cooldown_active",
            EngineError::RateLimited { .. } => "rate_limited",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::RewardExpired(_) => "reward_expired",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Database(_) => "database",
            EngineError::Io(_) => "io",
            EngineError::Json(_) => "json",
            EngineError::Config(_) => "config",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}
