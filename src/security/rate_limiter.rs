//! Per-identity fixed-window rate limiter.
//!
//! Each identity carries two independent counters, one per minute and one
//! per hour. A call resets any window whose length has elapsed, charges both
//! counters, and then compares. Denied calls are still charged.

use crate::config::RateLimitConfig;
use crate::security::decision::{Decision, DecisionReason};
use crate::security::query::Identity;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(3_600);

/// One fixed window.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    window_start: Instant,
}

impl WindowCounter {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_elapsed(&self, now: Instant, length: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= length
    }

    /// Reset if the window elapsed, then charge one request.
    fn charge(&mut self, now: Instant, length: Duration) -> u32 {
        if self.is_elapsed(now, length) {
            self.count = 0;
            self.window_start = now;
        }
        self.count = self.count.saturating_add(1);
        self.count
    }

    fn resets_in(&self, now: Instant, length: Duration) -> Duration {
        length.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

/// Counters for one identity.
#[derive(Debug, Clone, Copy)]
struct RateWindowState {
    minute: WindowCounter,
    hour: WindowCounter,
}

impl RateWindowState {
    fn new(now: Instant) -> Self {
        Self {
            minute: WindowCounter::new(now),
            hour: WindowCounter::new(now),
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.minute.is_elapsed(now, MINUTE) && self.hour.is_elapsed(now, HOUR)
    }
}

/// Per-identity rate limiter.
///
/// The counter table is sharded; a given identity's read-increment-compare
/// runs under its shard's write lock, so concurrent calls for the same
/// identity are serialized while unrelated identities rarely contend.
pub struct RateLimiter {
    windows: DashMap<Identity, RateWindowState>,
    per_minute: u32,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            windows: DashMap::new(),
            per_minute,
            per_hour,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.per_minute, config.per_hour)
    }

    /// Charge one request to `identity` and decide.
    pub fn allow(&self, identity: &Identity) -> Decision {
        self.allow_at(identity, Instant::now())
    }

    pub(crate) fn allow_at(&self, identity: &Identity, now: Instant) -> Decision {
        let (minute_count, hour_count) = {
            let mut state = self
                .windows
                .entry(identity.clone())
                .or_insert_with(|| RateWindowState::new(now));
            let minute = state.minute.charge(now, MINUTE);
            let hour = state.hour.charge(now, HOUR);
            (minute, hour)
        };

        if minute_count > self.per_minute {
            warn!(
                identity = %identity,
                count = minute_count,
                limit = self.per_minute,
                "Per-minute rate limit exceeded"
            );
            return Decision::deny(DecisionReason::DeniedRateLimitedMinute);
        }

        if hour_count > self.per_hour {
            warn!(
                identity = %identity,
                count = hour_count,
                limit = self.per_hour,
                "Per-hour rate limit exceeded"
            );
            return Decision::deny(DecisionReason::DeniedRateLimitedHour);
        }

        debug!(
            identity = %identity,
            minute_count,
            hour_count,
            "Rate limit permit granted"
        );
        Decision::allow()
    }

    /// Current counters for `identity`, if it is tracked.
    pub fn status(&self, identity: &Identity) -> Option<RateLimitStatus> {
        self.status_at(identity, Instant::now())
    }

    pub(crate) fn status_at(&self, identity: &Identity, now: Instant) -> Option<RateLimitStatus> {
        let state = *self.windows.get(identity)?;
        let minute_count = if state.minute.is_elapsed(now, MINUTE) {
            0
        } else {
            state.minute.count
        };
        let hour_count = if state.hour.is_elapsed(now, HOUR) {
            0
        } else {
            state.hour.count
        };

        Some(RateLimitStatus {
            minute_count,
            per_minute: self.per_minute,
            minute_resets_in: state.minute.resets_in(now, MINUTE),
            hour_count,
            per_hour: self.per_hour,
            hour_resets_in: state.hour.resets_in(now, HOUR),
        })
    }

    /// Drop identities whose windows have all elapsed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.is_idle(now));
        let purged = before.saturating_sub(self.windows.len());
        if purged > 0 {
            debug!("Purged {} idle rate limit entries", purged);
        }
        purged
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }

    pub fn per_hour(&self) -> u32 {
        self.per_hour
    }
}

/// Rate limiter status for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub minute_count: u32,
    pub per_minute: u32,
    pub minute_resets_in: Duration,
    pub hour_count: u32,
    pub per_hour: u32,
    pub hour_resets_in: Duration,
}

impl RateLimitStatus {
    pub fn minute_utilization(&self) -> f64 {
        self.minute_count as f64 / self.per_minute as f64
    }

    pub fn hour_utilization(&self) -> f64 {
        self.hour_count as f64 / self.per_hour as f64
    }
}

/// Rate limiter builder.
pub struct RateLimiterBuilder {
    per_minute: u32,
    per_hour: u32,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            per_minute: defaults.per_minute,
            per_hour: defaults.per_hour,
        }
    }
}

impl RateLimiterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn per_minute(mut self, limit: u32) -> Self {
        self.per_minute = limit;
        self
    }

    pub fn per_hour(mut self, limit: u32) -> Self {
        self.per_hour = limit;
        self
    }

    pub fn build(self) -> RateLimiter {
        RateLimiter::new(self.per_minute, self.per_hour)
    }
}
