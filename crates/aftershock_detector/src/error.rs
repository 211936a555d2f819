//! Detector error types.

/// Detector result type
pub type DetectorResult<T> = Result<T, DetectorError>;

/// Errors raised while configuring a detector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectorError {
    /// Suppression line could not be parsed
    #[error("invalid suppression at line {line}: {reason}")]
    InvalidSuppression {
        /// 1-based line number in the suppression text
        line: usize,
        /// What is wrong with it
        reason: String,
    },

    /// Suppression pattern is empty or malformed
    #[error("invalid suppression pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// What is wrong with it
        reason: String,
    },

    /// The backend cannot accept this registration
    #[error("detector '{detector}' cannot register '{pattern}' at runtime")]
    Unsupported {
        /// Backend name
        detector: String,
        /// Pattern that was refused
        pattern: String,
    },
}
