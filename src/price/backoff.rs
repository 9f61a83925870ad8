//! Per-source penalty tracking for the failover selector.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_BASE_SECS: u64 = 2;
const DEFAULT_CEILING_SECS: u64 = 600;

/// Capped exponential backoff: `base * 2^(failures - 1)`, never above `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_BASE_SECS),
            Duration::from_secs(DEFAULT_CEILING_SECS),
        )
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .saturating_mul(1u32 << exponent)
            .min(self.ceiling)
    }
}

/// Penalty record for one source. Present only between a failure and the
/// next success of that source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffEntry {
    pub failures: u32,
    pub eligible_at: Instant,
}

#[derive(Debug, Default)]
pub struct BackoffTable {
    policy: BackoffPolicy,
    entries: HashMap<String, BackoffEntry>,
}

impl BackoffTable {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Whether `name` is still inside its penalty window at `now`.
    pub fn is_backed_off(&self, name: &str, now: Instant) -> bool {
        self.entries
            .get(name)
            .is_some_and(|entry| entry.eligible_at > now)
    }

    /// Extends the penalty of `name` and returns the delay applied.
    pub fn record_failure(&mut self, name: &str, now: Instant) -> Duration {
        let failures = self
            .entries
            .get(name)
            .map_or(1, |entry| entry.failures.saturating_add(1));
        let delay = self.policy.delay_for(failures);
        self.entries.insert(
            name.to_owned(),
            BackoffEntry {
                failures,
                eligible_at: now + delay,
            },
        );
        delay
    }

    /// Clears the penalty of `name`. Returns whether one existed.
    pub fn record_success(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn entry(&self, name: &str) -> Option<BackoffEntry> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
