//! AFTERSHOCK Runtime
//!
//! Shadow-execution correlation engine. Code that contains a failure with
//! `catch_unwind` (or by returning an error) may already have mutated shared
//! state before the failure was contained. Wrapping the code in a guarded
//! scope lets the engine re-run it on a replay thread after a caught fault,
//! so an attached conflicting-access detector such as ThreadSanitizer
//! reports every write the replay repeats.
//!
//! ```no_run
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! static DIRTY: AtomicBool = AtomicBool::new(false);
//!
//! aftershock_runtime::wrap(|| {
//!     let _: Result<(), _> = aftershock_runtime::catch(|| {
//!         DIRTY.store(true, Ordering::Relaxed);
//!         panic!("contained");
//!     });
//! });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod global;
pub mod handshake;
pub mod replay;
pub mod stack;
pub mod stats;

pub use config::{ConfigError, DiagnosticTarget, EngineConfig};
pub use engine::{Engine, EngineBuilder, FaultPayload};
pub use error::{EngineError, EngineResult};
pub use global::{catch, engine, init, on_error, on_recover, wrap, wrap_result};
pub use replay::ForwardError;
pub use stats::EngineStats;
