//! ThreadSanitizer backend.
//!
//! Only meaningful in binaries built with `-Zsanitizer=thread`; the
//! annotation entry points below are provided by the sanitizer runtime.
//!
//! TSan reads its suppressions once, at startup, before `main`. The engine's
//! internal set is therefore baked into `__tsan_default_suppressions`, and
//! runtime registration only verifies that what is asked for is already
//! covered.

use crate::detector::Detector;
use crate::error::{DetectorError, DetectorResult};
use crate::suppression::SuppressionSet;
use std::ffi::{c_char, c_int};

const CONFLICT_MARKER: &str = "WARNING: ThreadSanitizer: data race";

static DEFAULT_SUPPRESSIONS: &str = concat!(crate::internal_suppression_text!(), "\0");

unsafe extern "C" {
    fn AnnotateIgnoreReadsBegin(file: *const c_char, line: c_int);
    fn AnnotateIgnoreReadsEnd(file: *const c_char, line: c_int);
    fn AnnotateIgnoreWritesBegin(file: *const c_char, line: c_int);
    fn AnnotateIgnoreWritesEnd(file: *const c_char, line: c_int);
    fn AnnotateIgnoreSyncBegin(file: *const c_char, line: c_int);
    fn AnnotateIgnoreSyncEnd(file: *const c_char, line: c_int);
}

/// Hook consulted by the TSan runtime during initialisation.
#[unsafe(no_mangle)]
pub extern "C" fn __tsan_default_suppressions() -> *const c_char {
    DEFAULT_SUPPRESSIONS.as_ptr().cast()
}

/// Detector backed by the ThreadSanitizer runtime
#[derive(Debug)]
pub struct ThreadSanitizer {
    baked: SuppressionSet,
}

impl ThreadSanitizer {
    /// Create the backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            baked: SuppressionSet::internal(),
        }
    }
}

impl Default for ThreadSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ThreadSanitizer {
    fn name(&self) -> &str {
        "tsan"
    }

    fn quiet_begin(&self) {
        let file = c"aftershock".as_ptr();
        // SAFETY: provided by the sanitizer runtime; the annotations only
        // touch the calling thread's ignore counters.
        unsafe {
            AnnotateIgnoreSyncBegin(file, 0);
            AnnotateIgnoreReadsBegin(file, 0);
            AnnotateIgnoreWritesBegin(file, 0);
        }
    }

    fn quiet_end(&self) {
        let file = c"aftershock".as_ptr();
        // SAFETY: as above; ends the region opened by `quiet_begin`.
        unsafe {
            AnnotateIgnoreWritesEnd(file, 0);
            AnnotateIgnoreReadsEnd(file, 0);
            AnnotateIgnoreSyncEnd(file, 0);
        }
    }

    fn register(&self, suppressions: &SuppressionSet) -> DetectorResult<()> {
        if let Some(missing) = suppressions.iter().find(|s| !self.baked.contains(s)) {
            tracing::warn!(
                pattern = %missing,
                "tsan reads suppressions at startup; add it to TSAN_OPTIONS=suppressions=<file>"
            );
            return Err(DetectorError::Unsupported {
                detector: self.name().to_string(),
                pattern: missing.to_string(),
            });
        }
        tracing::debug!(entries = suppressions.len(), "suppressions already baked into tsan");
        Ok(())
    }

    fn conflict_marker(&self) -> Option<&'static str> {
        Some(CONFLICT_MARKER)
    }
}
