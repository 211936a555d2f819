//! The correlation engine.
//!
//! [`Engine::wrap`] enters a guarded scope. On the thread that owns the
//! innermost scope (the primary) it starts a replay thread bound to the new
//! scope; inside a replay it only records the nesting. The recovery
//! interceptors ([`Engine::on_recover`], [`Engine::on_error`] and the
//! [`Engine::catch`] helper) drive the replay when the primary caught a
//! fault, and forward the replay's values back when called on a replay
//! thread. Every anomaly becomes a [`Diagnostic`]; nothing here alters the
//! guarded program's values or control flow.

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::handshake::{self, Report};
use crate::replay;
use crate::stack::{CorrelationStack, RecordLink, ScopeRecord};
use crate::stats::{EngineStats, StatsCounters};
use aftershock_core::{
    Diagnostic, DiagnosticSink, FaultSignature, InterceptKind, NullSink, ScopeId,
    ScopeIdGenerator, capture_lineage,
};
use aftershock_detector::{Detector, NullDetector, SuppressionSet, default_detector, quiet};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

/// Payload of a caught panic
pub type FaultPayload = Box<dyn Any + Send + 'static>;

#[derive(Debug)]
struct EngineInner {
    config: EngineConfig,
    detector: Arc<dyn Detector>,
    sink: Arc<dyn DiagnosticSink>,
    stack: CorrelationStack,
    ids: ScopeIdGenerator,
    stats: StatsCounters,
}

/// Shadow-execution correlation engine.
///
/// Cheap to clone; clones share the correlation stack.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Builder for [`Engine`]
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    detector: Option<Arc<dyn Detector>>,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl EngineBuilder {
    /// Create a builder with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `detector` instead of the one this build links against
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Send diagnostics to `sink` instead of the configured target
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration, register the internal suppressions and
    /// build the engine
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the detector refuses
    /// the suppressions
    pub fn build(self) -> EngineResult<Engine> {
        self.config.validate()?;
        let detector = self.detector.unwrap_or_else(default_detector);
        let sink = self.sink.unwrap_or_else(|| self.config.diagnostics.sink());

        if self.config.enabled && self.config.register_suppressions {
            let suppressions = SuppressionSet::internal();
            detector.register(&suppressions)?;
            tracing::debug!(
                detector = detector.name(),
                entries = suppressions.len(),
                "registered internal suppressions"
            );
        }

        Ok(Engine::assemble(self.config, detector, sink))
    }
}

impl Engine {
    /// Build an engine for `config` with the linked detector
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the detector refuses
    /// the suppressions
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        EngineBuilder::new().with_config(config).build()
    }

    /// Start building an engine
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// An engine that passes everything through
    #[must_use]
    pub fn disabled() -> Self {
        Self::assemble(
            EngineConfig::default().with_enabled(false),
            Arc::new(NullDetector),
            Arc::new(NullSink),
        )
    }

    fn assemble(
        config: EngineConfig,
        detector: Arc<dyn Detector>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let stack = CorrelationStack::new(Arc::clone(&detector));
        Self {
            inner: Arc::new(EngineInner {
                config,
                detector,
                sink,
                stack,
                ids: ScopeIdGenerator::new(),
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether guarded scopes are tracked at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Detector the engine hides its coordination from
    #[must_use]
    pub fn detector(&self) -> &dyn Detector {
        self.inner.detector.as_ref()
    }

    /// Number of live guarded scopes
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.stack.depth()
    }

    /// Activity counters
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.inner.stats.snapshot()
    }

    /// Run `callable` as a guarded scope and return its value.
    ///
    /// A panic escaping `callable` tears the scope down and continues
    /// unwinding with the original payload; no replay happens for it at
    /// this level. `callable` may run a second time on the scope's replay
    /// thread, which is why it is `Fn + Sync`.
    pub fn wrap<F, T>(&self, callable: F) -> T
    where
        F: Fn() -> T + Sync,
    {
        if !self.inner.config.enabled {
            return callable();
        }
        match self.inner.stack.top() {
            Some(enclosing) if !self.owns(&enclosing) => self.wrap_nested(&enclosing, &callable),
            _ => self.wrap_primary(&callable),
        }
    }

    /// [`Engine::wrap`] for callables that report failure through a `Result`,
    /// typically passed to [`Engine::on_error`] before being returned
    pub fn wrap_result<F, T, E>(&self, callable: F) -> Result<T, E>
    where
        F: Fn() -> Result<T, E> + Sync,
    {
        self.wrap(callable)
    }

    /// Recovery interceptor for caught panics.
    ///
    /// Pass the result of `catch_unwind` (as `Option`) on every recovery
    /// path, including the one where nothing was caught. Returns its input.
    pub fn on_recover(&self, fault: Option<FaultPayload>) -> Option<FaultPayload> {
        self.observe_fault(fault.as_deref());
        fault
    }

    /// Recovery interceptor for returned errors; `Ok` stands for "no error".
    /// Returns its input.
    pub fn on_error<T, E>(&self, result: Result<T, E>) -> Result<T, E>
    where
        E: fmt::Display,
    {
        if self.inner.config.enabled {
            let signature = result
                .as_ref()
                .err()
                .map(|err| FaultSignature::from_display(err));
            self.intercept(InterceptKind::Error, signature);
        }
        result
    }

    /// Run `f`, catch a panic escaping it, and route the outcome through
    /// [`Engine::on_recover`] on both paths.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if `f` panicked
    pub fn catch<F, T>(&self, f: F) -> Result<T, FaultPayload>
    where
        F: FnOnce() -> T,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                self.observe_fault(None);
                Ok(value)
            }
            Err(payload) => {
                self.observe_fault(Some(payload.as_ref()));
                Err(payload)
            }
        }
    }

    pub(crate) fn report(&self, diagnostic: &Diagnostic) {
        self.inner.stats.record_diagnostic();
        let _quiet = quiet(self.detector());
        tracing::debug!(code = diagnostic.code(), scope = ?diagnostic.scope(), "{diagnostic}");
        self.inner.sink.emit(diagnostic);
    }

    fn owns(&self, record: &ScopeRecord) -> bool {
        let _quiet = quiet(self.detector());
        record.lineage().is_current_thread()
    }

    fn wrap_nested<F, T>(&self, enclosing: &ScopeRecord, callable: &F) -> T
    where
        F: Fn() -> T + Sync,
    {
        let record = {
            let _quiet = quiet(self.detector());
            let record = Arc::new(ScopeRecord::nested(self.inner.ids.next_id(), enclosing));
            tracing::trace!(scope = %record.id(), "entered nested scope on replay thread");
            record
        };
        self.inner.stats.record_nested_scope();
        let _entry = self.inner.stack.push(record);
        callable()
    }

    fn wrap_primary<F, T>(&self, callable: &F) -> T
    where
        F: Fn() -> T + Sync,
    {
        let inner = &self.inner;
        let id = inner.ids.next_id();
        let lineage = capture_lineage();
        inner.stats.record_primary_scope();
        let body = || drop(callable());

        let outcome = thread::scope(|threads| {
            let (primary, replay_port) = handshake::pair(id);
            let (link, handle) = match replay::spawn(threads, self, id, replay_port, &body) {
                Ok(handle) => {
                    inner.stats.record_spawn();
                    (RecordLink::Linked(Mutex::new(primary)), Some(handle))
                }
                Err(err) => {
                    tracing::warn!(scope = %id, %err, "replay thread could not be started");
                    (RecordLink::Unavailable(err.to_string()), None)
                }
            };
            let record = Arc::new(ScopeRecord::primary(id, lineage, link));
            tracing::debug!(scope = %id, linked = record.is_linked(), "entered guarded scope");

            let entry = inner.stack.push(Arc::clone(&record));
            let outcome = panic::catch_unwind(AssertUnwindSafe(callable));

            if let Some(handle) = handle {
                if let Some(port) = record.port() {
                    port.shutdown(self.detector());
                }
                if handle.join().is_err() {
                    tracing::error!(scope = %id, "replay thread panicked outside the guarded callable");
                }
            }
            drop(entry);
            outcome
        });

        match outcome {
            Ok(value) => {
                tracing::debug!(scope = %id, "left guarded scope");
                value
            }
            Err(payload) => {
                tracing::debug!(scope = %id, "fault escaped guarded scope");
                panic::resume_unwind(payload)
            }
        }
    }

    fn observe_fault(&self, fault: Option<&(dyn Any + Send)>) {
        if self.inner.config.enabled {
            self.intercept(InterceptKind::Recover, fault.map(FaultSignature::from_panic));
        }
    }

    fn intercept(&self, kind: InterceptKind, signature: Option<FaultSignature>) {
        match self.route() {
            Route::Unscoped => self.report(&Diagnostic::Unscoped { kind }),
            Route::Absorbed => {}
            Route::Forward(scope) => match replay::forward(scope, kind, signature) {
                Ok(()) => self.inner.stats.record_forward(),
                Err(err) => {
                    let _quiet = quiet(self.detector());
                    tracing::error!(%scope, %err, "could not forward intercepted value");
                }
            },
            Route::Stray(scope) => {
                let _quiet = quiet(self.detector());
                tracing::error!(%scope, "interceptor called from a thread outside the scope");
            }
            Route::Primary(record) => {
                if let Some(signature) = signature {
                    self.replay_and_compare(&record, kind, &signature);
                }
            }
        }
    }

    fn route(&self) -> Route {
        let _quiet = quiet(self.detector());
        let Some(top) = self.inner.stack.top() else {
            return Route::Unscoped;
        };
        if top.lineage().is_current_thread() {
            return Route::Primary(top);
        }
        match top.link() {
            RecordLink::Nested => Route::Absorbed,
            RecordLink::Linked(_) => Route::Forward(top.id()),
            RecordLink::Unavailable(_) => Route::Stray(top.id()),
        }
    }

    fn replay_and_compare(&self, record: &ScopeRecord, kind: InterceptKind, primary: &FaultSignature) {
        let scope = record.id();
        if let RecordLink::Unavailable(reason) = record.link() {
            self.report(&Diagnostic::ReplayUnavailable {
                scope,
                reason: reason.clone(),
            });
            return;
        }
        let Some(mut port) = record.port() else {
            tracing::error!(%scope, "primary owns a scope without a replay link");
            return;
        };

        tracing::debug!(%scope, %kind, "dispatching replay");
        if port.dispatch(self.detector()).is_err() {
            port.reclaim_turn();
            self.report(&Diagnostic::ReplayLost { scope });
            return;
        }
        self.inner.stats.record_dispatch();

        let mut passes = 0usize;
        let mut mismatched = false;
        loop {
            match port.next_report() {
                Some(Report::Completed) => break,
                Some(Report::Forwarded { kind: actual, signature }) => {
                    if actual == kind {
                        passes += 1;
                        if let Some(diagnostic) = compare(scope, kind, primary, signature) {
                            self.report(&diagnostic);
                        }
                    } else if signature.is_some() {
                        mismatched = true;
                        self.report(&Diagnostic::InterceptorMismatch {
                            scope,
                            expected: kind,
                            actual,
                        });
                    }
                    if port.acknowledge().is_err() {
                        port.reclaim_turn();
                        self.report(&Diagnostic::ReplayLost { scope });
                        return;
                    }
                }
                None => {
                    port.reclaim_turn();
                    self.report(&Diagnostic::ReplayLost { scope });
                    return;
                }
            }
        }
        port.reclaim_turn();
        tracing::debug!(%scope, passes, "replay completed");

        match passes {
            0 if !mismatched => self.report(&Diagnostic::NotIntercepted { scope, kind }),
            0 | 1 => {}
            count => self.report(&Diagnostic::InterceptedMultipleTimes { scope, kind, count }),
        }
    }
}

/// Where an intercepted value goes
enum Route {
    /// No guarded scope is live
    Unscoped,
    /// The calling thread owns the innermost scope
    Primary(Arc<ScopeRecord>),
    /// Replay thread inside a scope it entered itself
    Absorbed,
    /// Replay thread directly inside the primary scope it serves
    Forward(ScopeId),
    /// Neither the owner nor its replay thread
    Stray(ScopeId),
}

fn compare(
    scope: ScopeId,
    kind: InterceptKind,
    primary: &FaultSignature,
    replay: Option<FaultSignature>,
) -> Option<Diagnostic> {
    match replay {
        None => Some(Diagnostic::DidNotRaise { scope, kind }),
        Some(replay) if replay != *primary => Some(Diagnostic::DifferentValue {
            scope,
            kind,
            primary: primary.clone(),
            replay,
        }),
        Some(_) => None,
    }
}
