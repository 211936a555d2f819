//! AFTERSHOCK Core Types
//!
//! Pure types shared by the detector seam and the correlation engine.
//! Nothing in this crate spawns threads or touches the detector.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diagnostic;
pub mod id;
pub mod lineage;
pub mod signature;

// Re-exports
pub use diagnostic::{
    Diagnostic, DiagnosticSink, InterceptKind, MemorySink, NullSink, StderrSink, TracingSink,
    DIAGNOSTIC_PREFIX,
};
pub use id::{ScopeId, ScopeIdGenerator};
pub use lineage::{Lineage, Role, capture_lineage, current_role, is_same_thread, mark_replay_thread};
pub use signature::FaultSignature;
