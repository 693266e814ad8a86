//! Retry backoff policy.

use chrono::TimeDelta;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with bounded jitter.
///
/// The delay before attempt `n + 1` becomes claimable is
/// `min(base * 2^(n-1) + jitter_sample, max)` where `jitter_sample` is drawn
/// uniformly from `[0, jitter]`. Jitter is clamped to `base`, so a sample for
/// attempt `n + 1` is never below a sample for attempt `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl BackoffPolicy {
    const MIN_DELAY: Duration = Duration::from_millis(1);
    const MAX_EXPONENT: u32 = 32;

    /// Creates a policy. `base` is raised to at least one millisecond, `max`
    /// to at least `base`, and `jitter` is clamped to `base`.
    #[must_use]
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        let base = base.max(Self::MIN_DELAY);
        Self {
            base,
            max: max.max(base),
            jitter: jitter.min(base),
        }
    }

    /// Policy without jitter, used where deterministic delays matter.
    #[must_use]
    pub fn fixed_exponential(base: Duration, max: Duration) -> Self {
        Self::new(base, max, Duration::ZERO)
    }

    /// Returns the base delay.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Returns the delay ceiling.
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Returns the deterministic part of the delay for the given attempt count.
    #[must_use]
    pub fn floor_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(Self::MAX_EXPONENT);
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Returns the delay to apply after `attempts` failed attempts.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> TimeDelta {
        let jitter = self.sample_jitter();
        let delay = self
            .floor_for(attempts)
            .saturating_add(jitter)
            .min(self.max)
            .max(Self::MIN_DELAY);
        TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX)
    }

    fn sample_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let upper = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=upper))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(300),
            Duration::from_millis(250),
        )
    }
}
