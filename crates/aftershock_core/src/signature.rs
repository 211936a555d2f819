//! Fault signatures.
//!
//! Fault payloads (panic payloads, returned errors) are compared between the
//! primary and the replay by their string form only. Payloads can carry
//! private state, so structural equality is not available in general.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Text rendered for panic payloads with no printable form.
pub const OPAQUE_PAYLOAD: &str = "Box<dyn Any>";

macro_rules! render_as {
    ($payload:expr, $($ty:ty),+ $(,)?) => {
        $(
            if let Some(value) = $payload.downcast_ref::<$ty>() {
                return Some(value.to_string());
            }
        )+
    };
}

/// Render the payload types `panic!` and `panic_any` are commonly given.
fn render(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        return Some((*text).to_owned());
    }
    render_as!(
        payload,
        String,
        Box<dyn std::error::Error + Send + Sync>,
        Box<dyn std::error::Error + Send>,
        Box<dyn fmt::Display + Send + Sync>,
        Box<dyn fmt::Display + Send>,
        std::io::Error,
        i8, i16, i32, i64, i128, isize,
        u8, u16, u32, u64, u128, usize,
        f32, f64, bool, char,
    );
    None
}

/// String form of a fault or error value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultSignature(String);

impl FaultSignature {
    /// Signature of a panic payload.
    ///
    /// `panic!("...")` payloads are `&'static str` or `String`. Primitives,
    /// `io::Error` and boxed errors or `Display` values raised with
    /// `panic_any` render through `Display`. Anything else is opaque, and two
    /// opaque payloads compare equal.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self(render(payload).unwrap_or_else(|| OPAQUE_PAYLOAD.to_owned()))
    }

    /// Signature of an error value
    #[must_use]
    pub fn from_display(value: &dyn fmt::Display) -> Self {
        Self(value.to_string())
    }

    /// The rendered text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this signature came from an opaque payload
    #[must_use]
    pub fn is_opaque(&self) -> bool {
        self.0 == OPAQUE_PAYLOAD
    }
}

impl fmt::Display for FaultSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
