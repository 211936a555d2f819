//! AFTERSHOCK Detector Seam
//!
//! The conflicting-access detector is an external oracle. This crate is the
//! narrow surface the engine needs from it: quiet regions that hide the
//! engine's own coordination from the detector, and a one-time registration
//! of suppression patterns for the engine's internal symbols.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod detector;
pub mod error;
pub mod recording;
pub mod suppression;
#[cfg(feature = "tsan")]
pub mod tsan;

pub use detector::{Detector, NullDetector, Quiet, default_detector, quiet};
pub use error::{DetectorError, DetectorResult};
pub use recording::RecordingDetector;
pub use suppression::{INTERNAL_SUPPRESSIONS, Suppression, SuppressionKind, SuppressionSet};
#[cfg(feature = "tsan")]
pub use tsan::ThreadSanitizer;
