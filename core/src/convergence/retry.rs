//! Retry pacing and per-task failure tracking.
//!
//! Recoverable failures are retried every cycle without a cap; the
//! `RetryLedger` only counts attempts so logs and reports can show how long
//! a task has been stuck. `RetryPolicy` decides how long the background
//! service pauses between cycles that did nothing but retry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::task::TaskKey;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

/// Pause between retry-only cycles.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(strategy: BackoffStrategy, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        RetryPolicy {
            strategy,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before the retry cycle following `streak` consecutive
    /// retry-only cycles (0 for the first).
    pub fn delay_ms(&self, streak: u32) -> u64 {
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(streak as u64 + 1),
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(streak)),
        };
        raw.min(self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    /// Fixed 1000ms, capped at 30s.
    fn default() -> Self {
        RetryPolicy {
            strategy: BackoffStrategy::Fixed,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RetryState {
    failures: u32,
    first_failed_cycle: u64,
}

/// Consecutive failure counts per task.
#[derive(Debug, Clone, Default)]
pub struct RetryLedger {
    states: HashMap<TaskKey, RetryState>,
}

impl RetryLedger {
    pub fn new() -> Self {
        RetryLedger::default()
    }

    /// Record a failure in `cycle`; returns the consecutive failure count.
    pub fn record_failure(&mut self, key: &TaskKey, cycle: u64) -> u32 {
        let entry = self.states.entry(key.clone()).or_insert(RetryState {
            failures: 0,
            first_failed_cycle: cycle,
        });
        entry.failures += 1;
        entry.failures
    }

    /// Record a success. Forgets the failure history.
    pub fn record_success(&mut self, key: &TaskKey) {
        self.states.remove(key);
    }

    pub fn failure_count(&self, key: &TaskKey) -> u32 {
        self.states.get(key).map(|s| s.failures).unwrap_or(0)
    }

    /// Cycle of the first failure in the current streak.
    pub fn failing_since(&self, key: &TaskKey) -> Option<u64> {
        self.states.get(key).map(|s| s.first_failed_cycle)
    }

    /// Forget tasks that are no longer scheduled.
    pub fn retain(&mut self, keep: impl Fn(&TaskKey) -> bool) {
        self.states.retain(|k, _| keep(k));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::task::TaskCategory;

    fn key(target: &str) -> TaskKey {
        TaskKey {
            category: TaskCategory::ModuleInstall,
            target: target.into(),
        }
    }

    #[test]
    fn default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_delay_ms, 1000);
        assert_eq!(p.strategy, BackoffStrategy::Fixed);
        assert_eq!(p.delay_ms(0), 1000);
        assert_eq!(p.delay_ms(9), 1000);
    }

    #[test]
    fn linear_delay() {
        let p = RetryPolicy::new(BackoffStrategy::Linear, 1000, 60_000);
        assert_eq!(p.delay_ms(0), 1000);
        assert_eq!(p.delay_ms(1), 2000);
        assert_eq!(p.delay_ms(2), 3000);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let p = RetryPolicy::new(BackoffStrategy::Exponential, 1000, 5000);
        assert_eq!(p.delay_ms(0), 1000);
        assert_eq!(p.delay_ms(1), 2000);
        assert_eq!(p.delay_ms(2), 4000);
        assert_eq!(p.delay_ms(3), 5000);
        assert_eq!(p.delay_ms(80), 5000);
    }

    #[test]
    fn ledger_counts_without_limit() {
        let mut ledger = RetryLedger::new();
        for cycle in 1..=50 {
            assert_eq!(ledger.record_failure(&key("module:a"), cycle), cycle as u32);
        }
        assert_eq!(ledger.failing_since(&key("module:a")), Some(1));
    }

    #[test]
    fn success_resets() {
        let mut ledger = RetryLedger::new();
        ledger.record_failure(&key("module:a"), 1);
        ledger.record_success(&key("module:a"));
        assert_eq!(ledger.failure_count(&key("module:a")), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn retain_prunes_unscheduled() {
        let mut ledger = RetryLedger::new();
        ledger.record_failure(&key("module:a"), 1);
        ledger.record_failure(&key("module:b"), 1);
        ledger.retain(|k| k.target == "module:b");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.failure_count(&key("module:b")), 1);
    }

    #[test]
    fn independent_keys() {
        let mut ledger = RetryLedger::new();
        ledger.record_failure(&key("module:a"), 3);
        assert_eq!(ledger.failure_count(&key("module:a")), 1);
        assert_eq!(ledger.failure_count(&key("module:b")), 0);
        assert_eq!(ledger.failing_since(&key("module:b")), None);
    }
}
