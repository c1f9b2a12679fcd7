//! Exponential backoff with full jitter.
//!
//! The delay before retry `n` (zero-based tier) is drawn uniformly from
//! `[0, min(max_delay, initial_delay * 2^n)]` and then raised to
//! `min_delay`, so a retry never fires in a tight loop.
//!
//! [`BackoffPolicy`] is the immutable description; [`Backoff`] is the
//! per-loop cursor that tracks the current tier and the attempts spent.

use std::time::Duration;

use rand::Rng;

/// Retry policy shared by the discovery loop and the event-channel reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Ceiling of the first retry.
    pub initial_delay: Duration,
    /// Upper bound of any ceiling.
    pub max_delay: Duration,
    /// Floor applied after jitter.
    pub min_delay: Duration,
    /// Total number of attempts (first try included); `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    /// One-shot inventory fetch: 10 attempts, ceilings from 1 s up to 3 min.
    pub fn discovery() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3 * 60),
            min_delay: Duration::from_millis(500),
            max_attempts: Some(10),
        }
    }

    /// Long-lived socket: never gives up, ceilings from 1 s up to 1 min.
    pub fn reconnect() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            min_delay: Duration::from_millis(500),
            max_attempts: None,
        }
    }

    /// Un-jittered upper bound for `tier`.
    pub fn ceiling(&self, tier: u32) -> Duration {
        let factor = 2u32.saturating_pow(tier);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay for `tier` drawn from `rng`.
    pub fn delay_with<R: Rng>(&self, tier: u32, rng: &mut R) -> Duration {
        let ceiling_ms = self.ceiling(tier).as_millis() as u64;
        let drawn = Duration::from_millis(rng.random_range(0..=ceiling_ms));
        drawn.max(self.min_delay).min(self.max_delay.max(self.min_delay))
    }

    /// Jittered delay for `tier` using the thread-local generator.
    pub fn delay(&self, tier: u32) -> Duration {
        self.delay_with(tier, &mut rand::rng())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::discovery()
    }
}

/// Cursor over a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    tier: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            tier: 0,
            attempts: 0,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record one attempt; returns `false` once the attempt budget is spent.
    pub fn record_attempt(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.policy
            .max_attempts
            .is_none_or(|max| self.attempts <= max)
    }

    /// `true` when another attempt is allowed after the ones recorded.
    pub fn can_retry(&self) -> bool {
        self.policy
            .max_attempts
            .is_none_or(|max| self.attempts < max)
    }

    /// Delay before the next retry; escalates the tier.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.tier);
        self.tier = self.tier.saturating_add(1);
        delay
    }

    /// Delay before the next retry without escalating the tier.
    ///
    /// Used for transient failures that say nothing about the box's health.
    pub fn hold_delay(&self) -> Duration {
        self.policy.delay(self.tier.saturating_sub(1))
    }

    /// Back to the first tier with a fresh attempt budget.
    pub fn reset(&mut self) {
        self.tier = 0;
        self.attempts = 0;
    }
}
