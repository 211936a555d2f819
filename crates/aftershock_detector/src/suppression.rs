//! Suppression patterns.
//!
//! Patterns use the ThreadSanitizer suppression-file syntax: one
//! `<kind>:<pattern>` entry per line, `#` comments, blank lines ignored.
//! Patterns are matched against fully-qualified function names, so the
//! engine's coordination code is excluded by path.

use crate::error::{DetectorError, DetectorResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suppression entries for the engine's own coordination code.
///
/// Expands to a string literal so backends can embed it at compile time.
/// Entries are `race_top`: a plain `race` entry matches any frame, and every
/// replayed access has `aftershock_runtime::replay` somewhere on its stack.
#[macro_export]
macro_rules! internal_suppression_text {
    () => {
        "race_top:aftershock_runtime::stack::*\n\
         race_top:aftershock_runtime::handshake::*\n\
         race_top:aftershock_runtime::replay::*\n\
         race_top:aftershock_runtime::engine::Engine::report\n\
         race_top:aftershock_core::diagnostic::*\n\
         race_top:tokio::sync::*\n"
    };
}

/// Suppression entries for the engine's own coordination code
pub const INTERNAL_SUPPRESSIONS: &str = internal_suppression_text!();

/// Kind of report a suppression applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuppressionKind {
    /// Any frame of either access matches
    Race,
    /// Top frame of either access matches
    RaceTop,
    /// Thread leaks
    Thread,
    /// Mutex misuse
    Mutex,
    /// Lock-order inversions
    Deadlock,
    /// Accesses from a matching library
    CalledFromLib,
}

impl SuppressionKind {
    /// Keyword used in suppression files
    #[must_use]
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::Race => "race",
            Self::RaceTop => "race_top",
            Self::Thread => "thread",
            Self::Mutex => "mutex",
            Self::Deadlock => "deadlock",
            Self::CalledFromLib => "called_from_lib",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "race" => Some(Self::Race),
            "race_top" => Some(Self::RaceTop),
            "thread" => Some(Self::Thread),
            "mutex" => Some(Self::Mutex),
            "deadlock" => Some(Self::Deadlock),
            "called_from_lib" => Some(Self::CalledFromLib),
            _ => None,
        }
    }
}

/// One suppression entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Suppression {
    /// Report kind
    pub kind: SuppressionKind,
    /// Function, file or library pattern (`*` wildcards)
    pub pattern: String,
}

impl Suppression {
    /// Create a validated suppression
    ///
    /// # Errors
    ///
    /// Returns error if the pattern is empty or spans whitespace
    pub fn new(kind: SuppressionKind, pattern: impl Into<String>) -> DetectorResult<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(DetectorError::InvalidPattern {
                pattern,
                reason: "pattern is empty".to_string(),
            });
        }
        if pattern.chars().any(char::is_whitespace) {
            return Err(DetectorError::InvalidPattern {
                pattern,
                reason: "pattern contains whitespace".to_string(),
            });
        }
        // `race:foo` is a kind prefix; `race::foo` is a path.
        if let Some((head, rest)) = pattern.split_once(':') {
            if !rest.starts_with(':') && SuppressionKind::from_keyword(head).is_some() {
                return Err(DetectorError::InvalidPattern {
                    reason: format!("pattern repeats the `{head}:` kind prefix"),
                    pattern,
                });
            }
        }
        Ok(Self { kind, pattern })
    }

    /// Shorthand for a `race:` suppression
    ///
    /// # Errors
    ///
    /// Returns error if the pattern is invalid
    pub fn race(pattern: impl Into<String>) -> DetectorResult<Self> {
        Self::new(SuppressionKind::Race, pattern)
    }

    /// Shorthand for a `race_top:` suppression, matched against the top frame only
    ///
    /// # Errors
    ///
    /// Returns error if the pattern is invalid
    pub fn race_top(pattern: impl Into<String>) -> DetectorResult<Self> {
        Self::new(SuppressionKind::RaceTop, pattern)
    }
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.keyword(), self.pattern)
    }
}

/// Ordered, duplicate-free set of suppressions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionSet {
    entries: Vec<Suppression>,
}

impl SuppressionSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine's own coordination symbols
    #[must_use]
    pub fn internal() -> Self {
        // Checked by test_internal_set_parses.
        Self::parse(INTERNAL_SUPPRESSIONS).unwrap_or_default()
    }

    /// Parse suppression-file text
    ///
    /// # Errors
    ///
    /// Returns error on an unknown kind or an invalid pattern
    pub fn parse(text: &str) -> DetectorResult<Self> {
        let mut set = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((keyword, pattern)) = line.split_once(':') else {
                return Err(DetectorError::InvalidSuppression {
                    line: index + 1,
                    reason: format!("expected '<kind>:<pattern>', got '{line}'"),
                });
            };
            let Some(kind) = SuppressionKind::from_keyword(keyword) else {
                return Err(DetectorError::InvalidSuppression {
                    line: index + 1,
                    reason: format!("unknown suppression kind '{keyword}'"),
                });
            };
            set.insert(Suppression::new(kind, pattern)?);
        }
        Ok(set)
    }

    /// Add an entry; returns false if it was already present
    pub fn insert(&mut self, suppression: Suppression) -> bool {
        if self.entries.contains(&suppression) {
            return false;
        }
        self.entries.push(suppression);
        true
    }

    /// Add every entry of `other`
    pub fn extend(&mut self, other: &SuppressionSet) {
        for entry in &other.entries {
            self.insert(entry.clone());
        }
    }

    /// Whether `suppression` is in the set
    #[must_use]
    pub fn contains(&self, suppression: &Suppression) -> bool {
        self.entries.contains(suppression)
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Suppression> {
        self.entries.iter()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as suppression-file text
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_internal_set_parses() {
        let set = SuppressionSet::parse(INTERNAL_SUPPRESSIONS).unwrap();
        assert_eq!(set, SuppressionSet::internal());
        assert!(set.len() >= 4);
        assert!(set.contains(&Suppression::race_top("aftershock_runtime::stack::*").unwrap()));
        assert!(set.iter().all(|s| s.kind == SuppressionKind::RaceTop));
    }

    #[test]
    fn test_internal_set_renders_back_to_text() {
        assert_eq!(SuppressionSet::internal().render(), INTERNAL_SUPPRESSIONS);
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let set = SuppressionSet::parse("# engine\n\nrace_top:foo::bar\n  mutex:baz  \n").unwrap();
        let kinds: Vec<_> = set.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SuppressionKind::RaceTop, SuppressionKind::Mutex]);
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let err = SuppressionSet::parse("race:a\nbogus:b\n").unwrap_err();
        assert!(matches!(err, DetectorError::InvalidSuppression { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        let err = SuppressionSet::parse("race").unwrap_err();
        assert!(matches!(err, DetectorError::InvalidSuppression { line: 1, .. }));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(matches!(
            Suppression::race(""),
            Err(DetectorError::InvalidPattern { .. })
        ));
        assert!(Suppression::race("a b").is_err());
    }

    #[test]
    fn test_kind_prefix_in_pattern_rejected() {
        assert!(matches!(
            Suppression::race_top("race:foo"),
            Err(DetectorError::InvalidPattern { .. })
        ));
        assert!(matches!(
            SuppressionSet::parse("race:mutex:foo"),
            Err(DetectorError::InvalidPattern { .. })
        ));
        assert!(Suppression::race("race::foo").is_ok());
        assert!(Suppression::race("mine:foo").is_ok());
    }

    #[test]
    fn test_insert_deduplicates() {
        let mut set = SuppressionSet::new();
        assert!(set.insert(Suppression::race("x").unwrap()));
        assert!(!set.insert(Suppression::race("x").unwrap()));
        let mut other = SuppressionSet::new();
        other.insert(Suppression::race("x").unwrap());
        other.insert(Suppression::race("y").unwrap());
        set.extend(&other);
        assert_eq!(set.len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn prop_rendered_set_parses_back(patterns in proptest::collection::vec("[a-z_*]{1,12}(::[a-z_*]{1,12}){0,2}", 0..8)) {
            let mut set = SuppressionSet::new();
            for pattern in patterns {
                set.insert(Suppression::race(pattern).unwrap());
            }
            let reparsed = SuppressionSet::parse(&set.render()).unwrap();
            prop_assert_eq!(reparsed, set);
        }
    }
}
