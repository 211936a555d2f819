//! Engine statistics.
//!
//! Counters are relaxed atomics: bumping one from the replay thread must not
//! order it against the primary.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of engine activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Guarded scopes entered by a primary thread
    pub primary_scopes: u64,
    /// Guarded scopes entered inside a replay
    pub nested_scopes: u64,
    /// Replay threads started
    pub replays_spawned: u64,
    /// Replay invocations dispatched after a fault or error
    pub replays_dispatched: u64,
    /// Values forwarded from replay threads to their primary
    pub values_forwarded: u64,
    /// Diagnostics emitted
    pub diagnostics: u64,
}

impl EngineStats {
    /// Total guarded scopes entered
    #[must_use]
    pub fn scopes_entered(&self) -> u64 {
        self.primary_scopes + self.nested_scopes
    }

    /// Share of primary scopes that needed a replay (0.0 - 1.0)
    #[must_use]
    pub fn replay_rate(&self) -> f64 {
        if self.primary_scopes == 0 {
            return 0.0;
        }
        self.replays_dispatched as f64 / self.primary_scopes as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    primary_scopes: AtomicU64,
    nested_scopes: AtomicU64,
    replays_spawned: AtomicU64,
    replays_dispatched: AtomicU64,
    values_forwarded: AtomicU64,
    diagnostics: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_primary_scope(&self) {
        self.primary_scopes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_nested_scope(&self) {
        self.nested_scopes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_spawn(&self) {
        self.replays_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.replays_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forward(&self) {
        self.values_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_diagnostic(&self) {
        self.diagnostics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineStats {
        EngineStats {
            primary_scopes: self.primary_scopes.load(Ordering::Relaxed),
            nested_scopes: self.nested_scopes.load(Ordering::Relaxed),
            replays_spawned: self.replays_spawned.load(Ordering::Relaxed),
            replays_dispatched: self.replays_dispatched.load(Ordering::Relaxed),
            values_forwarded: self.values_forwarded.load(Ordering::Relaxed),
            diagnostics: self.diagnostics.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::default();
        counters.record_primary_scope();
        counters.record_primary_scope();
        counters.record_nested_scope();
        counters.record_dispatch();
        let stats = counters.snapshot();
        assert_eq!(stats.scopes_entered(), 3);
        assert_eq!(stats.replays_dispatched, 1);
        assert!((stats.replay_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_replay_rate_without_scopes() {
        assert_eq!(EngineStats::default().replay_rate(), 0.0);
    }
}
