//! Process-wide engine.
//!
//! Guarded code usually cannot thread an [`Engine`] handle through to every
//! recovery site, so the free functions here operate on one shared engine.
//! It is installed by [`init`], or built from the environment on first use.

use crate::config::EngineConfig;
use crate::engine::{Engine, FaultPayload};
use crate::error::{EngineError, EngineResult};
use once_cell::sync::OnceCell;
use std::fmt;

static ENGINE: OnceCell<Engine> = OnceCell::new();

/// Install the process-wide engine
///
/// # Errors
///
/// Returns error if an engine is already installed (explicitly or by first
/// use), or if building the engine fails
pub fn init(config: EngineConfig) -> EngineResult<&'static Engine> {
    let mut installed = false;
    let engine = ENGINE.get_or_try_init(|| {
        installed = true;
        Engine::new(config)
    })?;
    if installed {
        tracing::info!(enabled = engine.is_enabled(), "aftershock engine installed");
        Ok(engine)
    } else {
        Err(EngineError::AlreadyInitialized)
    }
}

/// The process-wide engine.
///
/// Built from `AFTERSHOCK_*` environment variables if [`init`] was never
/// called. An unusable environment leaves a pass-through engine in place.
pub fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| {
        match EngineConfig::from_env()
            .map_err(EngineError::from)
            .and_then(Engine::new)
        {
            Ok(engine) => engine,
            Err(err) => {
                tracing::error!(%err, "engine could not be built from the environment; guarded scopes pass through");
                Engine::disabled()
            }
        }
    })
}

/// [`Engine::wrap`] on the process-wide engine
pub fn wrap<F, T>(callable: F) -> T
where
    F: Fn() -> T + Sync,
{
    engine().wrap(callable)
}

/// [`Engine::wrap_result`] on the process-wide engine
pub fn wrap_result<F, T, E>(callable: F) -> Result<T, E>
where
    F: Fn() -> Result<T, E> + Sync,
{
    engine().wrap_result(callable)
}

/// [`Engine::on_recover`] on the process-wide engine
pub fn on_recover(fault: Option<FaultPayload>) -> Option<FaultPayload> {
    engine().on_recover(fault)
}

/// [`Engine::on_error`] on the process-wide engine
pub fn on_error<T, E>(result: Result<T, E>) -> Result<T, E>
where
    E: fmt::Display,
{
    engine().on_error(result)
}

/// [`Engine::catch`] on the process-wide engine
///
/// # Errors
///
/// Returns the panic payload if `f` panicked
pub fn catch<F, T>(f: F) -> Result<T, FaultPayload>
where
    F: FnOnce() -> T,
{
    engine().catch(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticTarget;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn fault(message: &str) {
        std::panic::panic_any(message.to_string());
    }

    // The only test in this crate that touches the process-wide engine.
    #[test]
    fn test_global_engine_lifecycle() {
        let installed = init(EngineConfig::default().with_diagnostics(DiagnosticTarget::Silent))
            .unwrap();
        assert!(std::ptr::eq(installed, engine()));
        assert!(matches!(
            init(EngineConfig::default()),
            Err(EngineError::AlreadyInitialized)
        ));

        let flag = AtomicBool::new(false);
        let value = wrap(|| {
            let caught = catch(|| {
                flag.store(true, Ordering::Relaxed);
                fault("global fault");
            });
            assert!(caught.is_err());
            7
        });
        assert_eq!(value, 7);
        assert_eq!(engine().stats().replays_dispatched, 1);

        let passed: Result<(), &str> = wrap_result(|| on_error(Ok(())));
        assert!(passed.is_ok());
        assert!(on_recover(None).is_none());
        assert_eq!(engine().depth(), 0);
    }
}
