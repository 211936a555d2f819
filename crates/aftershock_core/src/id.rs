//! Identifiers for guarded scopes.
//!
//! Scope ids are handed out by a per-engine counter, so they are stable
//! within one run and readable in logs (`scope_17`).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Scope identifier - identifies one live guarded-scope entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Create from a raw value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope_{}", self.0)
    }
}

/// Monotonic source of [`ScopeId`]s.
///
/// Both the primary thread and replay threads draw from the same generator;
/// the counter is a relaxed atomic so drawing an id never creates a
/// synchronisation edge between them.
#[derive(Debug, Default)]
pub struct ScopeIdGenerator {
    next: AtomicU64,
}

impl ScopeIdGenerator {
    /// Create a generator starting at `scope_1`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Draw the next id
    pub fn next_id(&self) -> ScopeId {
        ScopeId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Number of ids handed out so far
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_id_display() {
        assert_eq!(ScopeId::from_raw(17).to_string(), "scope_17");
    }

    #[test]
    fn test_generator_is_monotonic() {
        let ids = ScopeIdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a.as_u64(), 1);
        assert!(b > a);
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn test_scope_id_serde() {
        let id = ScopeId::from_raw(3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "3");
        let back: ScopeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
