//! Diagnostics emitted by the correlation engine.
//!
//! Every anomaly the engine notices is a [`Diagnostic`]: reported, never
//! fatal, never altering the guarded program's control flow. Harnesses
//! recognise them by the [`DIAGNOSTIC_PREFIX`] and the stable substrings of
//! each message.

use crate::id::ScopeId;
use crate::signature::FaultSignature;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Prefix of every diagnostic line written to standard error
pub const DIAGNOSTIC_PREFIX: &str = "===";

/// Which recovery interceptor a value travelled through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterceptKind {
    /// A caught panic, via `on_recover`
    Recover,
    /// A returned error, via `on_error`
    Error,
}

impl InterceptKind {
    /// Name of the interceptor operation
    #[must_use]
    pub const fn interceptor(&self) -> &'static str {
        match self {
            Self::Recover => "on_recover",
            Self::Error => "on_error",
        }
    }
}

impl std::fmt::Display for InterceptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.interceptor())
    }
}

/// An anomaly noticed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A recovery interceptor ran with no guarded scope on the stack
    Unscoped {
        /// Interceptor that was called
        kind: InterceptKind,
    },
    /// The replay reached the interceptor without a fault or error
    DidNotRaise {
        /// Scope being replayed
        scope: ScopeId,
        /// Interceptor involved
        kind: InterceptKind,
    },
    /// The replay's fault or error renders differently from the primary's
    DifferentValue {
        /// Scope being replayed
        scope: ScopeId,
        /// Interceptor involved
        kind: InterceptKind,
        /// Primary's value
        primary: FaultSignature,
        /// Replay's value
        replay: FaultSignature,
    },
    /// The replay finished without passing through the interceptor
    NotIntercepted {
        /// Scope being replayed
        scope: ScopeId,
        /// Interceptor involved
        kind: InterceptKind,
    },
    /// The replay passed through the interceptor more than once
    InterceptedMultipleTimes {
        /// Scope being replayed
        scope: ScopeId,
        /// Interceptor involved
        kind: InterceptKind,
        /// Number of passes
        count: usize,
    },
    /// The replay passed through the other interceptor
    InterceptorMismatch {
        /// Scope being replayed
        scope: ScopeId,
        /// Interceptor the primary went through
        expected: InterceptKind,
        /// Interceptor the replay went through
        actual: InterceptKind,
    },
    /// A panic escaped the guarded callable on the replay thread
    ReplayFaultEscaped {
        /// Scope being replayed
        scope: ScopeId,
        /// The escaped payload
        signature: FaultSignature,
    },
    /// No replay thread exists for the scope
    ReplayUnavailable {
        /// Scope without a replay thread
        scope: ScopeId,
        /// Why the thread is missing
        reason: String,
    },
    /// The replay thread went away mid-invocation
    ReplayLost {
        /// Scope being replayed
        scope: ScopeId,
    },
}

impl Diagnostic {
    /// Short machine-readable name, used as a log field
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unscoped { .. } => "unscoped",
            Self::DidNotRaise { .. } => "did_not_raise",
            Self::DifferentValue { .. } => "different_value",
            Self::NotIntercepted { .. } => "not_intercepted",
            Self::InterceptedMultipleTimes { .. } => "intercepted_multiple_times",
            Self::InterceptorMismatch { .. } => "interceptor_mismatch",
            Self::ReplayFaultEscaped { .. } => "replay_fault_escaped",
            Self::ReplayUnavailable { .. } => "replay_unavailable",
            Self::ReplayLost { .. } => "replay_lost",
        }
    }

    /// Scope the diagnostic is about, if any
    #[must_use]
    pub const fn scope(&self) -> Option<ScopeId> {
        match self {
            Self::Unscoped { .. } => None,
            Self::DidNotRaise { scope, .. }
            | Self::DifferentValue { scope, .. }
            | Self::NotIntercepted { scope, .. }
            | Self::InterceptedMultipleTimes { scope, .. }
            | Self::InterceptorMismatch { scope, .. }
            | Self::ReplayFaultEscaped { scope, .. }
            | Self::ReplayUnavailable { scope, .. }
            | Self::ReplayLost { scope } => Some(*scope),
        }
    }

    /// The line written to standard error, prefix included
    #[must_use]
    pub fn render(&self) -> String {
        format!("{DIAGNOSTIC_PREFIX} {self}")
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unscoped { kind } => {
                write!(f, "{kind} called without an enclosing guarded scope.")
            }
            Self::DidNotRaise { kind: InterceptKind::Recover, .. } => {
                write!(f, "Replay thread did not panic as it should have.")
            }
            Self::DidNotRaise { kind: InterceptKind::Error, .. } => {
                write!(f, "Replay thread did not return an error as it should have.")
            }
            Self::DifferentValue { kind: InterceptKind::Recover, primary, replay, .. } => {
                write!(f, "Replay thread panicked with different argument: {primary} != {replay}")
            }
            Self::DifferentValue { kind: InterceptKind::Error, primary, replay, .. } => {
                write!(f, "Replay thread returned a different error: {primary} != {replay}")
            }
            Self::NotIntercepted { kind: InterceptKind::Recover, .. } => {
                write!(f, "Replay thread did not recover as it should have.")
            }
            Self::NotIntercepted { kind: InterceptKind::Error, .. } => {
                write!(
                    f,
                    "Replay thread did not return its error through on_error as it should have."
                )
            }
            Self::InterceptedMultipleTimes { kind: InterceptKind::Recover, count, .. } => {
                write!(f, "Replay thread recovered multiple times ({count}).")
            }
            Self::InterceptedMultipleTimes { kind: InterceptKind::Error, count, .. } => {
                write!(f, "Replay thread returned through on_error multiple times ({count}).")
            }
            Self::InterceptorMismatch { expected, actual, .. } => {
                write!(f, "Replay thread reached {actual} where {expected} was expected.")
            }
            Self::ReplayFaultEscaped { scope, signature } => {
                write!(f, "Replay thread panic escaped the guarded callable of {scope}: {signature}")
            }
            Self::ReplayUnavailable { scope, reason } => {
                write!(f, "Replay thread unavailable for {scope}: {reason}")
            }
            Self::ReplayLost { scope } => {
                write!(f, "Replay thread for {scope} exited before completing its invocation.")
            }
        }
    }
}

/// Destination for diagnostics
pub trait DiagnosticSink: Send + Sync + std::fmt::Debug {
    /// Record one diagnostic
    fn emit(&self, diagnostic: &Diagnostic);
}

/// Writes `=== <message>` lines to standard error
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", diagnostic.render());
    }
}

/// Routes diagnostics into `tracing` only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        tracing::warn!(
            code = diagnostic.code(),
            scope = diagnostic.scope().map(|s| s.as_u64()),
            "{}",
            diagnostic
        );
    }
}

/// Drops every diagnostic
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _diagnostic: &Diagnostic) {}
}

/// Keeps diagnostics in memory for later inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    #[must_use]
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rendered lines, as they would appear on standard error
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.snapshot().iter().map(Diagnostic::render).collect()
    }

    /// Whether any rendered line contains `needle`
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    /// Number of diagnostics recorded
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, diagnostic: &Diagnostic) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ScopeId {
        ScopeId::from_raw(4)
    }

    #[test]
    fn test_render_has_prefix() {
        let d = Diagnostic::Unscoped { kind: InterceptKind::Recover };
        assert_eq!(
            d.render(),
            "=== on_recover called without an enclosing guarded scope."
        );
    }

    #[test]
    fn test_recover_messages_keep_stable_substrings() {
        let cases = [
            (
                Diagnostic::DidNotRaise { scope: scope(), kind: InterceptKind::Recover },
                "Replay thread did not panic",
            ),
            (
                Diagnostic::DifferentValue {
                    scope: scope(),
                    kind: InterceptKind::Recover,
                    primary: FaultSignature::from_display(&1),
                    replay: FaultSignature::from_display(&2),
                },
                "Replay thread panicked with different argument: 1 != 2",
            ),
            (
                Diagnostic::NotIntercepted { scope: scope(), kind: InterceptKind::Recover },
                "Replay thread did not recover",
            ),
            (
                Diagnostic::InterceptedMultipleTimes {
                    scope: scope(),
                    kind: InterceptKind::Recover,
                    count: 3,
                },
                "Replay thread recovered multiple times (3)",
            ),
        ];
        for (diagnostic, needle) in cases {
            assert!(diagnostic.render().contains(needle), "{}", diagnostic.render());
        }
    }

    #[test]
    fn test_error_messages_differ_from_recover_messages() {
        let recover = Diagnostic::DidNotRaise { scope: scope(), kind: InterceptKind::Recover };
        let error = Diagnostic::DidNotRaise { scope: scope(), kind: InterceptKind::Error };
        assert_ne!(recover.to_string(), error.to_string());
        assert!(error.to_string().contains("did not return an error"));
    }

    #[test]
    fn test_scope_accessor() {
        assert_eq!(Diagnostic::Unscoped { kind: InterceptKind::Error }.scope(), None);
        assert_eq!(Diagnostic::ReplayLost { scope: scope() }.scope(), Some(scope()));
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.emit(&Diagnostic::ReplayLost { scope: scope() });
        sink.emit(&Diagnostic::Unscoped { kind: InterceptKind::Error });
        assert_eq!(sink.len(), 2);
        assert!(sink.contains("on_error called without"));
        assert!(sink.lines()[0].starts_with(DIAGNOSTIC_PREFIX));
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_diagnostic_serializes_with_code_names() {
        let d = Diagnostic::InterceptorMismatch {
            scope: scope(),
            expected: InterceptKind::Recover,
            actual: InterceptKind::Error,
        };
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("InterceptorMismatch"));
        assert_eq!(d.code(), "interceptor_mismatch");
        assert_eq!(d.to_string(), "Replay thread reached on_error where on_recover was expected.");
    }
}
