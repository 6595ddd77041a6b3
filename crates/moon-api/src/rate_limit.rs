//! Request rate limiting.
//!
//! Two limiters guard the pipeline: a per-entity token bucket refilled to
//! full capacity every 60 second window, and a per-(ip, username) login
//! limiter with an absolute 15 minute window where only failures consume
//! budget. Buckets live in a concurrent map with a per-bucket mutex;
//! creation is an atomic load-or-store through the map entry.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::auth::EntityKind;
use crate::config::RateLimitConfig;

const BUCKET_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a bucket check, carrying the response header values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window refills.
    pub reset_after: u64,
    /// Set when denied.
    pub retry_after: Option<u64>,
}

impl RateDecision {
    /// `X-RateLimit-*` headers for this decision.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_after.to_string()),
        ]
    }
}

#[derive(Debug)]
struct Bucket {
    remaining: u32,
    window_start: Instant,
}

/// Per-entity fixed-window token bucket.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<Bucket>>,
    user_limit: u32,
    apikey_limit: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            user_limit: config.user_rpm,
            apikey_limit: config.apikey_rpm,
        }
    }

    pub fn limit_for(&self, kind: EntityKind) -> u32 {
        match kind {
            EntityKind::User => self.user_limit,
            EntityKind::ApiKey => self.apikey_limit,
        }
    }

    /// Takes one token for the entity, creating its bucket on first use.
    pub fn check(&self, entity_id: &str, kind: EntityKind) -> RateDecision {
        let limit = self.limit_for(kind);
        let now = Instant::now();

        let entry = self.buckets.entry(entity_id.to_string()).or_insert_with(|| {
            Mutex::new(Bucket { remaining: limit, window_start: now })
        });
        let mut bucket = entry.lock();

        if now.duration_since(bucket.window_start) >= BUCKET_WINDOW {
            bucket.remaining = limit;
            bucket.window_start = now;
        }

        let reset_after = BUCKET_WINDOW
            .saturating_sub(now.duration_since(bucket.window_start))
            .as_secs()
            .max(1);

        if bucket.remaining > 0 {
            bucket.remaining -= 1;
            RateDecision {
                allowed: true,
                limit,
                remaining: bucket.remaining,
                reset_after,
                retry_after: None,
            }
        } else {
            RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_after,
                retry_after: Some(reset_after),
            }
        }
    }
}

#[derive(Debug)]
struct LoginWindow {
    failures: u32,
    window_start: Instant,
}

/// Per-(ip, username) login attempt limiter. Absolute window; successful
/// logins do not consume budget.
#[derive(Debug)]
pub struct LoginLimiter {
    attempts: DashMap<String, Mutex<LoginWindow>>,
    max_attempts: u32,
    window: Duration,
}

impl LoginLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts: config.login_attempts,
            window: Duration::from_secs(config.login_window),
        }
    }

    fn key(ip: &str, username: &str) -> String {
        format!("{}:{}", ip, username)
    }

    /// Seconds until the window opens again, or `None` when attempts
    /// remain.
    pub fn blocked_for(&self, ip: &str, username: &str) -> Option<u64> {
        let key = Self::key(ip, username);
        let entry = self.attempts.get(&key)?;
        let mut window = entry.lock();
        let now = Instant::now();
        if now.duration_since(window.window_start) >= self.window {
            window.failures = 0;
            window.window_start = now;
            return None;
        }
        if window.failures >= self.max_attempts {
            let retry = self.window - now.duration_since(window.window_start);
            Some(retry.as_secs().max(1))
        } else {
            None
        }
    }

    /// Records one failed attempt.
    pub fn record_failure(&self, ip: &str, username: &str) {
        let now = Instant::now();
        let entry = self
            .attempts
            .entry(Self::key(ip, username))
            .or_insert_with(|| Mutex::new(LoginWindow { failures: 0, window_start: now }));
        let mut window = entry.lock();
        if now.duration_since(window.window_start) >= self.window {
            window.failures = 0;
            window.window_start = now;
        }
        window.failures += 1;
    }

    /// Clears the budget after a successful login.
    pub fn record_success(&self, ip: &str, username: &str) {
        self.attempts.remove(&Self::key(ip, username));
    }
}
