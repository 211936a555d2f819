//! Replay thread runtime.
//!
//! Each primary scope gets one replay thread, started when the scope is
//! entered (so that everything the primary does inside the scope happens
//! after the spawn edge). The thread then idles until the primary dispatches
//! an invocation, runs the guarded callable once, reports completion and
//! idles again, until told to exit.
//!
//! Logging from this thread runs in quiet regions: a subscriber lock taken
//! here would order the replay after the primary.

use crate::engine::Engine;
use crate::handshake::{Command, HandshakeClosed, ReplayBinding, ReplayPort};
use aftershock_core::{Diagnostic, FaultSignature, InterceptKind, Role, ScopeId, mark_replay_thread};
use aftershock_detector::quiet;
use std::cell::RefCell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, Scope, ScopedJoinHandle};

thread_local! {
    static BINDING: RefCell<Option<ReplayBinding>> = const { RefCell::new(None) };
}

/// A value could not be forwarded from this thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    /// The calling thread is not a replay thread
    #[error("calling thread has no replay binding")]
    Unbound,

    /// The replay thread serves another scope
    #[error("replay thread is bound to {bound}, not {requested}")]
    WrongScope {
        /// Scope the thread serves
        bound: ScopeId,
        /// Scope the value was meant for
        requested: ScopeId,
    },

    /// The primary side is gone
    #[error(transparent)]
    Closed(#[from] HandshakeClosed),
}

/// Start the replay thread for `scope`.
///
/// `body` is the guarded callable with its result discarded; it is borrowed
/// for the lifetime of `threads`.
///
/// # Errors
///
/// Returns error if the OS refuses to create the thread
pub fn spawn<'scope, 'env>(
    threads: &'scope Scope<'scope, 'env>,
    engine: &Engine,
    scope: ScopeId,
    port: ReplayPort,
    body: &'scope (dyn Fn() + Sync + 'scope),
) -> io::Result<ScopedJoinHandle<'scope, ()>> {
    let config = engine.config();
    let mut builder =
        thread::Builder::new().name(format!("{}-{}", config.replay_thread_prefix, scope.as_u64()));
    if let Some(bytes) = config.replay_stack_size {
        builder = builder.stack_size(bytes);
    }
    let engine = engine.clone();
    builder.spawn_scoped(threads, move || run(&engine, port, body))
}

fn run(engine: &Engine, port: ReplayPort, body: &(dyn Fn() + Sync)) {
    mark_replay_thread();
    let (mut inbox, binding) = port.split();
    let scope = binding.scope();
    BINDING.with(|slot| *slot.borrow_mut() = Some(binding));
    {
        let _quiet = quiet(engine.detector());
        tracing::debug!(%scope, "replay thread started");
    }

    loop {
        match inbox.wait(engine.detector()) {
            Command::Exit => break,
            Command::Invoke => {}
        }
        debug_assert_eq!(inbox.turn(), Role::Replay, "invoked while the primary holds the turn");
        {
            let _quiet = quiet(engine.detector());
            tracing::debug!(%scope, "replaying guarded callable");
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
            engine.report(&Diagnostic::ReplayFaultEscaped {
                scope,
                signature: FaultSignature::from_panic(payload.as_ref()),
            });
        }
        if let Err(err) = inbox.complete() {
            let _quiet = quiet(engine.detector());
            tracing::error!(%err, "primary gone before the replay completed");
            break;
        }
    }

    BINDING.with(|slot| slot.borrow_mut().take());
    let _quiet = quiet(engine.detector());
    tracing::debug!(%scope, "replay thread exiting");
}

/// Scope served by the calling thread, if it is a replay thread
#[must_use]
pub fn bound_scope() -> Option<ScopeId> {
    BINDING.with(|slot| slot.borrow().as_ref().map(ReplayBinding::scope))
}

/// Forward a value seen by a recovery interceptor on this replay thread to
/// the primary of `scope`, and wait for the acknowledgement.
///
/// # Errors
///
/// Returns error if the calling thread does not serve `scope` or the primary is gone
pub fn forward(
    scope: ScopeId,
    kind: InterceptKind,
    signature: Option<FaultSignature>,
) -> Result<(), ForwardError> {
    BINDING.with(|slot| {
        let mut slot = slot.borrow_mut();
        let binding = slot.as_mut().ok_or(ForwardError::Unbound)?;
        if binding.scope() != scope {
            return Err(ForwardError::WrongScope {
                bound: binding.scope(),
                requested: scope,
            });
        }
        binding.forward(kind, signature)?;
        Ok(())
    })
}
