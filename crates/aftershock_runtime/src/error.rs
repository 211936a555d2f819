//! Engine error types.
//!
//! Only building an engine can fail. The interceptors themselves never
//! return errors; anomalies they notice become diagnostics.

use crate::config::ConfigError;
use aftershock_detector::DetectorError;

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while building or installing an engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The detector refused the suppression registration
    #[error("suppression registration failed: {0}")]
    Detector(#[from] DetectorError),

    /// A process-wide engine is already installed
    #[error("process-wide engine already initialized")]
    AlreadyInitialized,
}
