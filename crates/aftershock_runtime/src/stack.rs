//! The correlation stack.
//!
//! One [`ScopeRecord`] per live guarded scope, innermost last. Records pushed
//! by the primary thread always sit below records pushed by a replay thread:
//! a replay thread only runs while the primary is parked inside a recovery
//! interceptor of the innermost primary scope.
//!
//! ```text
//!   bottom                                                      top
//!   | primary | ... | primary | replay-nested | ... | replay-nested |
//! ```
//!
//! Both sides touch the stack, never at the same time. Every access runs in
//! a detector quiet region: the lock taken here must not become a
//! synchronisation edge between primary and replay.

use crate::handshake::PrimaryPort;
use aftershock_core::{Lineage, ScopeId};
use aftershock_detector::{Detector, quiet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How a record reaches its replay thread
#[derive(Debug)]
pub enum RecordLink {
    /// Pushed inside a replay thread; nothing to forward to at this level
    Nested,
    /// Pushed by the primary, with a live replay thread
    Linked(Mutex<PrimaryPort>),
    /// Pushed by the primary, but the replay thread could not be started
    Unavailable(String),
}

/// One live guarded scope
#[derive(Debug)]
pub struct ScopeRecord {
    id: ScopeId,
    lineage: Lineage,
    link: RecordLink,
}

impl ScopeRecord {
    /// Record for a scope entered by the primary
    #[must_use]
    pub fn primary(id: ScopeId, lineage: Lineage, link: RecordLink) -> Self {
        Self { id, lineage, link }
    }

    /// Record for a scope entered inside a replay; reuses the enclosing lineage
    #[must_use]
    pub fn nested(id: ScopeId, enclosing: &ScopeRecord) -> Self {
        Self {
            id,
            lineage: enclosing.lineage.clone(),
            link: RecordLink::Nested,
        }
    }

    /// Scope id
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Lineage of the thread that created the primary scope
    #[must_use]
    pub fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    /// Link to the replay thread
    #[must_use]
    pub fn link(&self) -> &RecordLink {
        &self.link
    }

    /// Whether this record has a replay thread to talk to
    #[must_use]
    pub fn is_linked(&self) -> bool {
        matches!(self.link, RecordLink::Linked(_))
    }

    /// Lock the primary port; only the primary thread calls this
    pub fn port(&self) -> Option<MutexGuard<'_, PrimaryPort>> {
        match &self.link {
            RecordLink::Linked(port) => Some(port.lock().unwrap_or_else(PoisonError::into_inner)),
            RecordLink::Nested | RecordLink::Unavailable(_) => None,
        }
    }
}

/// LIFO of live scope records
#[derive(Debug)]
pub struct CorrelationStack {
    records: Mutex<Vec<Arc<ScopeRecord>>>,
    detector: Arc<dyn Detector>,
}

impl CorrelationStack {
    /// Create an empty stack whose accesses are hidden from `detector`
    #[must_use]
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            detector,
        }
    }

    /// Push a record; it is popped when the returned entry drops
    pub fn push(&self, record: Arc<ScopeRecord>) -> StackEntry<'_> {
        let id = record.id();
        {
            let _quiet = quiet(self.detector.as_ref());
            self.lock().push(record);
        }
        StackEntry { stack: self, id }
    }

    /// Innermost record
    #[must_use]
    pub fn top(&self) -> Option<Arc<ScopeRecord>> {
        let _quiet = quiet(self.detector.as_ref());
        self.lock().last().cloned()
    }

    /// Number of live records
    #[must_use]
    pub fn depth(&self) -> usize {
        let _quiet = quiet(self.detector.as_ref());
        self.lock().len()
    }

    /// Whether no scope is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    fn pop(&self, expected: ScopeId) {
        let popped = {
            let _quiet = quiet(self.detector.as_ref());
            self.lock().pop()
        };
        match popped {
            Some(record) if record.id() == expected => {}
            Some(record) => tracing::error!(
                expected = %expected,
                popped = %record.id(),
                "correlation stack popped out of order"
            ),
            None => tracing::error!(expected = %expected, "correlation stack underflow"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<ScopeRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a record on the stack for as long as it lives
#[derive(Debug)]
#[must_use = "the record is popped when the entry is dropped"]
pub struct StackEntry<'a> {
    stack: &'a CorrelationStack,
    id: ScopeId,
}

impl StackEntry<'_> {
    /// Scope this entry keeps alive
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }
}

impl Drop for StackEntry<'_> {
    fn drop(&mut self) {
        self.stack.pop(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aftershock_core::capture_lineage;
    use aftershock_detector::RecordingDetector;

    fn record(raw: u64) -> Arc<ScopeRecord> {
        Arc::new(ScopeRecord::primary(
            ScopeId::from_raw(raw),
            capture_lineage(),
            RecordLink::Unavailable("test".to_string()),
        ))
    }

    #[test]
    fn test_push_pop_is_lifo() {
        let detector = Arc::new(RecordingDetector::new());
        let stack = CorrelationStack::new(detector.clone());
        assert!(stack.is_empty());
        {
            let outer = stack.push(record(1));
            assert_eq!(outer.id(), ScopeId::from_raw(1));
            {
                let _inner = stack.push(record(2));
                assert_eq!(stack.depth(), 2);
                assert_eq!(stack.top().unwrap().id(), ScopeId::from_raw(2));
            }
            assert_eq!(stack.top().unwrap().id(), ScopeId::from_raw(1));
        }
        assert!(stack.top().is_none());
        assert!(detector.is_balanced());
    }

    #[test]
    fn test_entry_pops_during_unwind() {
        let stack = CorrelationStack::new(Arc::new(RecordingDetector::new()));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _entry = stack.push(record(1));
            if stack.depth() == 1 {
                panic!("unwind through entry");
            }
        }));
        assert!(result.is_err());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_nested_record_reuses_lineage_without_link() {
        let outer = record(1);
        let inner = ScopeRecord::nested(ScopeId::from_raw(2), &outer);
        assert_eq!(inner.lineage(), outer.lineage());
        assert!(!inner.is_linked());
        assert!(matches!(inner.link(), RecordLink::Nested));
        assert!(inner.port().is_none());
    }

    #[test]
    fn test_every_access_is_quiet() {
        let detector = Arc::new(RecordingDetector::new());
        let stack = CorrelationStack::new(detector.clone());
        let entry = stack.push(record(1));
        let _ = stack.top();
        drop(entry);
        assert_eq!(detector.regions_opened(), 3);
        assert!(detector.is_balanced());
    }
}
