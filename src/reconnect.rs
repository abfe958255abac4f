//! Reconnection policy.
//!
//! Off by default: a dropped or failed connection ends the session and the
//! caller decides whether to build a new one. With [`ReconnectPolicy::Backoff`]
//! the session opens a fresh link after an exponentially growing delay
//! (plus up to 20% jitter), giving up after `max_attempts` consecutive
//! failures. A successful open resets the count.

// Rust guideline compliant 2026-02

use std::time::Duration;

use crate::constants::{
    DEFAULT_RECONNECT_INITIAL_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_RECONNECT_MAX_MS,
};

/// Bounded exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on the un-jittered delay.
    pub max: Duration,
    /// Consecutive failures tolerated before the session ends.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

/// What to do when a connection drops or fails to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// End the session.
    #[default]
    Disabled,
    /// Retry with bounded exponential backoff.
    Backoff(Backoff),
}

impl ReconnectPolicy {
    /// Un-jittered delay before retry number `attempt` (1-based), or `None`
    /// when no further retry should happen.
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        let Self::Backoff(backoff) = self else {
            return None;
        };
        if attempt == 0 || attempt > backoff.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(backoff.initial.saturating_mul(factor).min(backoff.max))
    }

    /// Delay before retry number `attempt`, with jitter applied.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        let base_ms = base.as_millis() as u64;
        let jitter_ms = rand::random::<u64>() % (base_ms / 5 + 1);
        Some(base + Duration::from_millis(jitter_ms))
    }
}
