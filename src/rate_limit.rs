//! Process-local rate limiting.
//!
//! Two limiters live here. [`FixedWindowLimiter`] caps raw request volume per
//! key (login attempts, anonymous comments). [`FailureLimiter`] counts failed
//! authentications per client and blocks the client for a cooldown once the
//! budget is spent. Both keep their state in memory only, so counts reset on
//! restart and are not shared between instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned map only means another request panicked mid-update; the
    // counters are still usable.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn seconds_until(deadline: Instant, now: Instant) -> u64 {
    let remaining = deadline.saturating_duration_since(now);
    // Round up so a client is never told "0 seconds" while still blocked.
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

// --- Fixed window ---

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// FixedWindowLimiter
///
/// Allows `limit` hits per key in each `window`. The window starts at the
/// first hit and is replaced once it has elapsed.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Counts a hit for `key`, failing with 429 once the window is full.
    pub fn check(&self, key: &str) -> Result<(), AppError> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), AppError> {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                count: 0,
                started: now,
            };
        }

        if entry.count >= self.limit {
            let retry_after_secs = seconds_until(entry.started + self.window, now);
            return Err(AppError::TooManyRequests {
                message: format!(
                    "Rate limit exceeded. Try again in {} seconds",
                    retry_after_secs
                ),
                retry_after_secs,
            });
        }

        entry.count += 1;
        Ok(())
    }

    /// Drops windows that have fully elapsed.
    pub fn prune(&self) {
        self.prune_at(Instant::now());
    }

    pub fn prune_at(&self, now: Instant) {
        let window = self.window;
        lock(&self.entries).retain(|_, w| now.duration_since(w.started) < window);
    }

    pub fn tracked_keys(&self) -> usize {
        lock(&self.entries).len()
    }
}

// --- Failure counting with block ---

#[derive(Debug, Clone, Copy)]
pub struct FailurePolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl FailurePolicy {
    /// Five failures inside fifteen minutes blocks the client for fifteen minutes.
    pub const LOGIN: FailurePolicy = FailurePolicy {
        max_attempts: 5,
        window: Duration::from_secs(15 * 60),
        block_duration: Duration::from_secs(15 * 60),
    };
}

#[derive(Debug, Clone, Copy)]
struct FailureEntry {
    count: u32,
    last_attempt: Instant,
    blocked_until: Option<Instant>,
}

/// Outcome of [`FailureLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Allowed { remaining: u32 },
    Blocked { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    /// Keys currently holding any failure record.
    pub total_blocked: usize,
    /// Keys whose block has not expired yet.
    pub active_blocks: usize,
}

/// FailureLimiter
///
/// Tracks failed attempts per key. A key that reaches `max_attempts` within
/// `window` is blocked for `block_duration`; a successful attempt clears it.
#[derive(Debug)]
pub struct FailureLimiter {
    policy: FailurePolicy,
    entries: Mutex<HashMap<String, FailureEntry>>,
}

impl FailureLimiter {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Attempt {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Attempt {
        let mut entries = lock(&self.entries);
        let max = self.policy.max_attempts;

        let Some(entry) = entries.get_mut(key) else {
            return Attempt::Allowed {
                remaining: max.saturating_sub(1),
            };
        };

        if let Some(until) = entry.blocked_until {
            if now < until {
                return Attempt::Blocked {
                    retry_after_secs: seconds_until(until, now),
                };
            }
            entries.remove(key);
            return Attempt::Allowed {
                remaining: max.saturating_sub(1),
            };
        }

        if now.duration_since(entry.last_attempt) > self.policy.window {
            entries.remove(key);
            return Attempt::Allowed {
                remaining: max.saturating_sub(1),
            };
        }

        if entry.count >= max {
            let until = now + self.policy.block_duration;
            entry.blocked_until = Some(until);
            return Attempt::Blocked {
                retry_after_secs: seconds_until(until, now),
            };
        }

        Attempt::Allowed {
            remaining: max.saturating_sub(entry.count + 1),
        }
    }

    /// Like [`check`](Self::check) but shaped for `?` in handlers.
    pub fn ensure_allowed(&self, key: &str) -> Result<(), AppError> {
        match self.check(key) {
            Attempt::Allowed { .. } => Ok(()),
            Attempt::Blocked { retry_after_secs } => {
                tracing::warn!(key, retry_after_secs, "blocked client attempted access");
                Err(AppError::TooManyRequests {
                    message: format!(
                        "Too many failed attempts. Try again in {} seconds",
                        retry_after_secs
                    ),
                    retry_after_secs,
                })
            }
        }
    }

    pub fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now());
    }

    pub fn record_failure_at(&self, key: &str, now: Instant) {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.to_string()).or_insert(FailureEntry {
            count: 0,
            last_attempt: now,
            blocked_until: None,
        });

        entry.count += 1;
        entry.last_attempt = now;

        if entry.count >= self.policy.max_attempts && entry.blocked_until.is_none() {
            entry.blocked_until = Some(now + self.policy.block_duration);
            tracing::warn!(key, attempts = entry.count, "client blocked after repeated failures");
        }
    }

    pub fn clear(&self, key: &str) {
        lock(&self.entries).remove(key);
    }

    pub fn stats(&self) -> SecurityStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> SecurityStats {
        let entries = lock(&self.entries);
        SecurityStats {
            total_blocked: entries.len(),
            active_blocks: entries
                .values()
                .filter(|e| e.blocked_until.is_some_and(|until| now < until))
                .count(),
        }
    }

    /// Forgets expired blocks and stale failure counts.
    pub fn prune(&self) {
        self.prune_at(Instant::now());
    }

    pub fn prune_at(&self, now: Instant) {
        let window = self.policy.window;
        lock(&self.entries).retain(|_, e| match e.blocked_until {
            Some(until) => now < until,
            None => now.duration_since(e.last_attempt) <= window,
        });
    }
}

// --- Shared state ---

/// RateLimits
///
/// The limiters shared through the application state.
#[derive(Debug)]
pub struct RateLimits {
    /// Login requests per client IP.
    pub login: FixedWindowLimiter,
    /// Anonymous comment submissions per client IP.
    pub comments: FixedWindowLimiter,
    /// Failed authentications per client IP.
    pub auth_failures: FailureLimiter,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login: FixedWindowLimiter::new(5, Duration::from_secs(60)),
            comments: FixedWindowLimiter::new(10, Duration::from_secs(60)),
            auth_failures: FailureLimiter::new(FailurePolicy::LOGIN),
        }
    }
}

impl RateLimits {
    pub fn prune(&self) {
        self.login.prune();
        self.comments.prune();
        self.auth_failures.prune();
    }
}

pub type RateLimitState = Arc<RateLimits>;

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: FailurePolicy = FailurePolicy {
        max_attempts: 3,
        window: Duration::from_secs(60),
        block_duration: Duration::from_secs(120),
    };

    #[test]
    fn fixed_window_blocks_after_limit_and_resets() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(limiter.check_at("ip", t0).is_ok());
        assert!(limiter.check_at("ip", t0 + Duration::from_secs(1)).is_ok());

        let err = limiter
            .check_at("ip", t0 + Duration::from_secs(10))
            .unwrap_err();
        match err {
            AppError::TooManyRequests {
                message,
                retry_after_secs,
            } => {
                assert_eq!(retry_after_secs, 50);
                assert_eq!(message, "Rate limit exceeded. Try again in 50 seconds");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Other keys are unaffected.
        assert!(limiter.check_at("other", t0 + Duration::from_secs(10)).is_ok());

        // A new window opens once the old one has elapsed.
        assert!(limiter.check_at("ip", t0 + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn fixed_window_prune_drops_elapsed_windows() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        limiter.check_at("a", t0).unwrap();
        limiter.check_at("b", t0 + Duration::from_secs(30)).unwrap();

        limiter.prune_at(t0 + Duration::from_secs(70));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn unknown_key_is_allowed_with_full_budget() {
        let limiter = FailureLimiter::new(POLICY);
        assert_eq!(limiter.check("ip"), Attempt::Allowed { remaining: 2 });
    }

    #[test]
    fn remaining_decreases_with_failures() {
        let limiter = FailureLimiter::new(POLICY);
        let t0 = Instant::now();
        limiter.record_failure_at("ip", t0);
        assert_eq!(limiter.check_at("ip", t0), Attempt::Allowed { remaining: 1 });
        limiter.record_failure_at("ip", t0);
        assert_eq!(limiter.check_at("ip", t0), Attempt::Allowed { remaining: 0 });
    }

    #[test]
    fn blocks_after_max_failures_until_block_expires() {
        let limiter = FailureLimiter::new(POLICY);
        let t0 = Instant::now();
        for _ in 0..3 {
            limiter.record_failure_at("ip", t0);
        }

        assert_eq!(
            limiter.check_at("ip", t0 + Duration::from_secs(20)),
            Attempt::Blocked {
                retry_after_secs: 100
            }
        );
        assert_eq!(limiter.stats_at(t0).active_blocks, 1);

        // Block expired: the entry is dropped and the client starts fresh.
        assert_eq!(
            limiter.check_at("ip", t0 + Duration::from_secs(121)),
            Attempt::Allowed { remaining: 2 }
        );
        assert_eq!(limiter.stats_at(t0).total_blocked, 0);
    }

    #[test]
    fn stale_failures_expire_after_window() {
        let limiter = FailureLimiter::new(POLICY);
        let t0 = Instant::now();
        limiter.record_failure_at("ip", t0);
        limiter.record_failure_at("ip", t0);

        assert_eq!(
            limiter.check_at("ip", t0 + Duration::from_secs(61)),
            Attempt::Allowed { remaining: 2 }
        );
    }

    #[test]
    fn clear_resets_the_key() {
        let limiter = FailureLimiter::new(POLICY);
        for _ in 0..3 {
            limiter.record_failure("ip");
        }
        assert!(limiter.ensure_allowed("ip").is_err());

        limiter.clear("ip");
        assert!(limiter.ensure_allowed("ip").is_ok());
    }

    #[test]
    fn prune_keeps_active_blocks_only() {
        let limiter = FailureLimiter::new(POLICY);
        let t0 = Instant::now();
        for _ in 0..3 {
            limiter.record_failure_at("blocked", t0);
        }
        limiter.record_failure_at("stale", t0);

        limiter.prune_at(t0 + Duration::from_secs(90));
        let stats = limiter.stats_at(t0 + Duration::from_secs(90));
        assert_eq!(stats.total_blocked, 1);
        assert_eq!(stats.active_blocks, 1);
    }
}
