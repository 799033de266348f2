//! Per-user sliding window rate limit for visit requests
//!
//! Keeps the admission times of each user's recent requests. A request is
//! admitted when fewer than `max_requests` admissions fall inside the trailing
//! window; admitted requests are logged whether or not they later pass
//! validation. Denied requests are not logged.
//!
//! Users whose log has gone idle are swept every [`PRUNE_INTERVAL`] checks, so
//! the map stays bounded by the users active inside one window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Number of `check` calls between sweeps of idle users
pub const PRUNE_INTERVAL: u64 = 256;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::minutes(60),
        }
    }
}

pub struct VisitRateLimiter {
    config: RateLimitConfig,
    /// user_id -> admission times, oldest first
    admissions: DashMap<String, VecDeque<DateTime<Utc>>>,
    checks: AtomicU64,
}

impl VisitRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            admissions: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Admit a request at `now` or fail with `RateLimited`
    pub fn check(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        let result = self.admit(user_id, now);

        // The entry guard from `admit` is released here; `retain` would
        // deadlock on the shard otherwise
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_INTERVAL == 0 {
            let pruned = self.prune(now);
            if pruned > 0 {
                debug!(pruned, tracked = self.admissions.len(), "Pruned idle rate limit entries");
            }
        }

        result
    }

    fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        let window_start = now - self.config.window;
        let mut log = self.admissions.entry(user_id.to_string()).or_default();

        while log.front().is_some_and(|t| *t <= window_start) {
            log.pop_front();
        }

        if log.len() >= self.config.max_requests as usize {
            let retry_at = log
                .front()
                .map(|oldest| *oldest + self.config.window)
                .unwrap_or(now);
            let retry_after_minutes = ceil_minutes(retry_at - now);
            warn!(
                user_id = %user_id,
                count = log.len(),
                limit = self.config.max_requests,
                "Visit rate limit exceeded"
            );
            return Err(EngineError::RateLimited { retry_after_minutes });
        }

        log.push_back(now);
        debug!(user_id = %user_id, count = log.len(), limit = self.config.max_requests, "Visit rate check passed");
        Ok(())
    }

    /// Drop users with no admissions inside the window
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let window_start = now - self.config.window;
        let before = self.admissions.len();
        self.admissions
            .retain(|_, log| log.back().is_some_and(|t| *t > window_start));
        before - self.admissions.len()
    }

    pub fn tracked_users(&self) -> usize {
        self.admissions.len()
    }
}

/// Whole minutes, rounded up, never below zero
pub(crate) fn ceil_minutes(d: Duration) -> i64 {
    let millis = d.num_milliseconds().max(0);
    (millis + 59_999) / 60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_eleventh_request_is_limited() {
        let limiter = VisitRateLimiter::new(RateLimitConfig::default());
        for i in 0..10 {
            limiter.check("u1", t0() + Duration::minutes(i)).unwrap();
        }

        let err = limiter.check("u1", t0() + Duration::minutes(30)).unwrap_err();
        match err {
            EngineError::RateLimited { retry_after_minutes } => assert_eq!(retry_after_minutes, 30),
            other => panic!("expected RateLimited, got {:?}", other),
        }

        // Other users are independent
        limiter.check("u2", t0() + Duration::minutes(30)).unwrap();
    }

    #[test]
    fn test_window_slides() {
        let limiter = VisitRateLimiter::new(RateLimitConfig::default());
        for i in 0..10 {
            limiter.check("u1", t0() + Duration::minutes(i)).unwrap();
        }
        assert!(limiter.check("u1", t0() + Duration::minutes(59)).is_err());

        // The first admission leaves the window after exactly 60 minutes
        limiter.check("u1", t0() + Duration::minutes(60)).unwrap();
        assert!(limiter.check("u1", t0() + Duration::minutes(60)).is_err());
    }

    #[test]
    fn test_prune_drops_idle_users() {
        let limiter = VisitRateLimiter::new(RateLimitConfig::default());
        limiter.check("u1", t0()).unwrap();
        limiter.check("u2", t0() + Duration::minutes(50)).unwrap();

        assert_eq!(limiter.prune(t0() + Duration::minutes(90)), 1);
        assert_eq!(limiter.tracked_users(), 1);
    }

    #[test]
    fn test_idle_users_swept_during_checks() {
        let limiter = VisitRateLimiter::new(RateLimitConfig::default());
        for i in 0..PRUNE_INTERVAL - 1 {
            limiter.check(&format!("user-{}", i), t0()).unwrap();
        }
        assert_eq!(limiter.tracked_users(), (PRUNE_INTERVAL - 1) as usize);

        // The next check lands on the sweep, after every earlier log has expired
        limiter.check("late", t0() + Duration::minutes(90)).unwrap();
        assert_eq!(limiter.tracked_users(), 1);

        // Limits still apply to the surviving user
        for i in 1..10 {
            limiter.check("late", t0() + Duration::minutes(90 + i)).unwrap();
        }
        assert!(limiter.check("late", t0() + Duration::minutes(100)).is_err());
    }

    #[test]
    fn test_ceil_minutes() {
        assert_eq!(ceil_minutes(Duration::seconds(60)), 1);
        assert_eq!(ceil_minutes(Duration::seconds(61)), 2);
        assert_eq!(ceil_minutes(Duration::zero()), 0);
        assert_eq!(ceil_minutes(Duration::seconds(-5)), 0);
    }
}
