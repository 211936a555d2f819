//! The detector trait and quiet regions.

use crate::error::DetectorResult;
use crate::suppression::SuppressionSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A process-wide conflicting-access detector.
///
/// Implementations are oracles the engine consults but never reimplements.
pub trait Detector: Send + Sync + fmt::Debug {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Stop recording memory accesses and synchronisation on the calling
    /// thread until the matching [`Detector::quiet_end`]. Regions nest.
    fn quiet_begin(&self);

    /// End the innermost quiet region on the calling thread
    fn quiet_end(&self);

    /// Exclude the given patterns from the detector's reports
    ///
    /// # Errors
    ///
    /// Returns error if the backend refuses the registration
    fn register(&self, suppressions: &SuppressionSet) -> DetectorResult<()>;

    /// Marker string the detector prints when it reports a conflict
    fn conflict_marker(&self) -> Option<&'static str> {
        None
    }
}

/// RAII quiet region; ends the region on drop.
///
/// Tied to the thread that opened it.
#[must_use = "the quiet region ends when the guard is dropped"]
pub struct Quiet<'a> {
    detector: &'a dyn Detector,
    _not_send: PhantomData<*const ()>,
}

impl Drop for Quiet<'_> {
    fn drop(&mut self) {
        self.detector.quiet_end();
    }
}

impl fmt::Debug for Quiet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quiet")
            .field("detector", &self.detector.name())
            .finish()
    }
}

/// Open a quiet region on the calling thread
pub fn quiet(detector: &dyn Detector) -> Quiet<'_> {
    detector.quiet_begin();
    Quiet {
        detector,
        _not_send: PhantomData,
    }
}

/// Detector used when no detector is linked in
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn name(&self) -> &str {
        "null"
    }

    fn quiet_begin(&self) {}

    fn quiet_end(&self) {}

    fn register(&self, suppressions: &SuppressionSet) -> DetectorResult<()> {
        tracing::debug!(
            entries = suppressions.len(),
            "no detector linked; suppressions ignored"
        );
        Ok(())
    }
}

/// The detector this build links against
#[cfg(feature = "tsan")]
#[must_use]
pub fn default_detector() -> Arc<dyn Detector> {
    Arc::new(crate::tsan::ThreadSanitizer::new())
}

/// The detector this build links against
#[cfg(not(feature = "tsan"))]
#[must_use]
pub fn default_detector() -> Arc<dyn Detector> {
    Arc::new(NullDetector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDetector;

    #[test]
    fn test_quiet_guard_brackets_region() {
        let detector = RecordingDetector::new();
        {
            let _outer = quiet(&detector);
            assert_eq!(detector.open_regions(), 1);
            {
                let _inner = quiet(&detector);
                assert_eq!(detector.open_regions(), 2);
            }
            assert_eq!(detector.open_regions(), 1);
        }
        assert!(detector.is_balanced());
        assert_eq!(detector.regions_opened(), 2);
    }

    #[test]
    fn test_null_detector_accepts_registration() {
        let detector = NullDetector;
        assert!(detector.register(&SuppressionSet::internal()).is_ok());
        assert_eq!(detector.name(), "null");
        assert_eq!(detector.conflict_marker(), None);
    }

    #[cfg(not(feature = "tsan"))]
    #[test]
    fn test_default_detector_is_null_without_tsan() {
        assert_eq!(default_detector().name(), "null");
    }
}
