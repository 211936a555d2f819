//! Call-lineage fingerprinting.
//!
//! A [`Lineage`] answers one question: "is the thread running right now the
//! thread that originally entered this guarded scope?". It records the
//! capturing thread's identity together with its role tag.
//!
//! The role tag lives in a thread-local set once when a replay thread starts.
//! Thread-locals are never shared between threads, so consulting them cannot
//! show up as a conflicting access in the detector's reports.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::thread::{self, ThreadId};

/// Role of a thread of control with respect to the correlation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Any thread the engine did not spawn
    Primary,
    /// A thread spawned to re-execute a guarded callable
    Replay,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Replay => write!(f, "replay"),
        }
    }
}

thread_local! {
    static ROLE: Cell<Role> = const { Cell::new(Role::Primary) };
}

/// Tag the calling thread as a replay thread.
///
/// Called exactly once, first thing, by every replay thread.
pub fn mark_replay_thread() {
    ROLE.with(|role| role.set(Role::Replay));
}

/// Role of the calling thread
#[must_use]
pub fn current_role() -> Role {
    ROLE.with(Cell::get)
}

/// Snapshot identifying the thread of control that captured it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lineage {
    thread: ThreadId,
    role: Role,
    name: Option<String>,
}

impl Lineage {
    /// Thread that captured this lineage
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Role of the capturing thread at capture time
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Name of the capturing thread, if it had one
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the calling thread is the one that captured this lineage
    #[must_use]
    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread
    }
}

/// Capture the calling thread's lineage
#[must_use]
pub fn capture_lineage() -> Lineage {
    let current = thread::current();
    Lineage {
        thread: current.id(),
        role: current_role(),
        name: current.name().map(str::to_owned),
    }
}

/// Whether the calling thread is the thread that captured `lineage`
#[must_use]
pub fn is_same_thread(lineage: &Lineage) -> bool {
    lineage.is_current_thread()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_thread_matches_itself() {
        let lineage = capture_lineage();
        assert!(is_same_thread(&lineage));
        assert!(lineage.is_current_thread());
        assert_eq!(lineage.role(), Role::Primary);
    }

    #[test]
    fn test_other_thread_does_not_match() {
        let lineage = capture_lineage();
        let seen_elsewhere = thread::spawn(move || is_same_thread(&lineage))
            .join()
            .unwrap();
        assert!(!seen_elsewhere);
    }

    #[test]
    fn test_lineage_captured_elsewhere_does_not_match_here() {
        let foreign = thread::spawn(capture_lineage).join().unwrap();
        assert!(!is_same_thread(&foreign));
    }

    #[test]
    fn test_role_tag_is_per_thread() {
        let role = thread::spawn(|| {
            mark_replay_thread();
            (current_role(), capture_lineage().role())
        })
        .join()
        .unwrap();
        assert_eq!(role, (Role::Replay, Role::Replay));
        assert_eq!(current_role(), Role::Primary);
    }

    #[test]
    fn test_lineage_records_thread_name() {
        let name = thread::Builder::new()
            .name("lineage-probe".to_string())
            .spawn(|| capture_lineage().name().map(str::to_owned))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name.as_deref(), Some("lineage-probe"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Primary.to_string(), "primary");
        assert_eq!(Role::Replay.to_string(), "replay");
    }
}
