//! In-process detector that records how it is driven.
//!
//! Has no conflict detection of its own. Tests use it to check that quiet
//! regions stay balanced and that suppressions are registered exactly once.

use crate::detector::Detector;
use crate::error::{DetectorError, DetectorResult};
use crate::suppression::SuppressionSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Detector that counts quiet regions and keeps registrations
#[derive(Debug, Default)]
pub struct RecordingDetector {
    opened: AtomicUsize,
    closed: AtomicUsize,
    registrations: Mutex<Vec<SuppressionSet>>,
    refuse_registration: bool,
}

impl RecordingDetector {
    /// Create a detector that accepts every registration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detector that refuses every registration
    #[must_use]
    pub fn refusing() -> Self {
        Self {
            refuse_registration: true,
            ..Self::default()
        }
    }

    /// Quiet regions opened so far
    #[must_use]
    pub fn regions_opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Quiet regions currently open, across all threads
    #[must_use]
    pub fn open_regions(&self) -> usize {
        self.regions_opened()
            .saturating_sub(self.closed.load(Ordering::Relaxed))
    }

    /// Whether every opened region was closed
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.open_regions() == 0
    }

    /// Every set registered so far, in order
    #[must_use]
    pub fn registrations(&self) -> Vec<SuppressionSet> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Detector for RecordingDetector {
    fn name(&self) -> &str {
        "recording"
    }

    fn quiet_begin(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    fn quiet_end(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    fn register(&self, suppressions: &SuppressionSet) -> DetectorResult<()> {
        if self.refuse_registration {
            let pattern = suppressions
                .iter()
                .next()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(DetectorError::Unsupported {
                detector: self.name().to_string(),
                pattern,
            });
        }
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(suppressions.clone());
        Ok(())
    }

    fn conflict_marker(&self) -> Option<&'static str> {
        Some("WARNING: RECORDED CONFLICT")
    }
}
