//! Engine configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the JSON document in
//! `AFTERSHOCK_CONFIG`, then the individual `AFTERSHOCK_*` overrides.

use aftershock_core::{DiagnosticSink, NullSink, StderrSink, TracingSink};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// JSON config document
pub const ENV_CONFIG: &str = "AFTERSHOCK_CONFIG";
/// `1`/`0`, `true`/`false`, `on`/`off`, `yes`/`no`
pub const ENV_ENABLED: &str = "AFTERSHOCK_ENABLED";
/// `stderr`, `tracing` or `silent`
pub const ENV_DIAGNOSTICS: &str = "AFTERSHOCK_DIAGNOSTICS";
/// Replay thread stack size in bytes
pub const ENV_REPLAY_STACK_SIZE: &str = "AFTERSHOCK_REPLAY_STACK_SIZE";

/// Smallest accepted replay thread stack
pub const MIN_REPLAY_STACK_SIZE: usize = 64 * 1024;
/// Largest accepted replay thread stack
pub const MAX_REPLAY_STACK_SIZE: usize = 1 << 30;

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Document could not be parsed
    #[error("config parse error: {0}")]
    Parse(String),

    /// A field has an unusable value
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Field or variable name
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Where diagnostics go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticTarget {
    /// `=== ...` lines on standard error
    #[default]
    Stderr,
    /// `tracing` warnings
    Tracing,
    /// Dropped
    Silent,
}

impl DiagnosticTarget {
    /// Sink for this target
    #[must_use]
    pub fn sink(&self) -> Arc<dyn DiagnosticSink> {
        match self {
            Self::Stderr => Arc::new(StderrSink),
            Self::Tracing => Arc::new(TracingSink),
            Self::Silent => Arc::new(NullSink),
        }
    }
}

impl FromStr for DiagnosticTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stderr" => Ok(Self::Stderr),
            "tracing" => Ok(Self::Tracing),
            "silent" => Ok(Self::Silent),
            other => Err(ConfigError::Invalid {
                field: "diagnostics".to_string(),
                reason: format!("unknown target '{other}'"),
            }),
        }
    }
}

/// Correlation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When false the engine is a pure pass-through
    pub enabled: bool,
    /// Diagnostic destination
    pub diagnostics: DiagnosticTarget,
    /// Replay thread names are `<prefix>-<scope>`
    pub replay_thread_prefix: String,
    /// Stack size for replay threads (platform default when unset)
    pub replay_stack_size: Option<usize>,
    /// Register internal suppressions with the detector at build time
    pub register_suppressions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            diagnostics: DiagnosticTarget::Stderr,
            replay_thread_prefix: "aftershock-replay".to_string(),
            replay_stack_size: None,
            register_suppressions: true,
        }
    }
}

impl EngineConfig {
    /// Enable or disable the engine
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the diagnostic destination
    #[must_use]
    pub fn with_diagnostics(mut self, target: DiagnosticTarget) -> Self {
        self.diagnostics = target;
        self
    }

    /// Set the replay thread name prefix
    #[must_use]
    pub fn with_replay_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.replay_thread_prefix = prefix.into();
        self
    }

    /// Set the replay thread stack size
    #[must_use]
    pub fn with_replay_stack_size(mut self, bytes: usize) -> Self {
        self.replay_stack_size = Some(bytes);
        self
    }

    /// Enable or disable suppression registration
    #[must_use]
    pub fn with_register_suppressions(mut self, register: bool) -> Self {
        self.register_suppressions = register;
        self
    }

    /// Parse a JSON document; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the document is not valid JSON for this type
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unusable value
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unusable value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG) {
            Some(text) => Self::from_json(&text)?,
            None => Self::default(),
        };
        if let Some(value) = lookup(ENV_ENABLED) {
            config.enabled = parse_flag(ENV_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_DIAGNOSTICS) {
            config.diagnostics = value.parse()?;
        }
        if let Some(value) = lookup(ENV_REPLAY_STACK_SIZE) {
            let bytes = value.trim().parse::<usize>().map_err(|e| ConfigError::Invalid {
                field: ENV_REPLAY_STACK_SIZE.to_string(),
                reason: e.to_string(),
            })?;
            config.replay_stack_size = Some(bytes);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check field values
    ///
    /// # Errors
    ///
    /// Returns error naming the first unusable field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replay_thread_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "replay_thread_prefix".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.replay_thread_prefix.contains('\0') {
            return Err(ConfigError::Invalid {
                field: "replay_thread_prefix".to_string(),
                reason: "must not contain NUL".to_string(),
            });
        }
        if let Some(bytes) = self.replay_stack_size {
            if !(MIN_REPLAY_STACK_SIZE..=MAX_REPLAY_STACK_SIZE).contains(&bytes) {
                return Err(ConfigError::Invalid {
                    field: "replay_stack_size".to_string(),
                    reason: format!(
                        "{bytes} outside {MIN_REPLAY_STACK_SIZE}..={MAX_REPLAY_STACK_SIZE}"
                    ),
                });
            }
        }
        Ok(())
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(ConfigError::Invalid {
            field: field.to_string(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert!(config.enabled);
        assert!(config.register_suppressions);
        assert_eq!(config.diagnostics, DiagnosticTarget::Stderr);
        assert_eq!(config.replay_stack_size, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = EngineConfig::from_json(r#"{"enabled": false, "diagnostics": "silent"}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.diagnostics, DiagnosticTarget::Silent);
        assert_eq!(config.replay_thread_prefix, "aftershock-replay");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_lookup_overrides_document() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_CONFIG, r#"{"enabled": false, "replay_thread_prefix": "shadow"}"#),
            (ENV_ENABLED, "yes"),
            (ENV_DIAGNOSTICS, "Tracing"),
            (ENV_REPLAY_STACK_SIZE, "131072"),
        ]))
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.diagnostics, DiagnosticTarget::Tracing);
        assert_eq!(config.replay_thread_prefix, "shadow");
        assert_eq!(config.replay_stack_size, Some(131_072));
    }

    #[test]
    fn test_lookup_without_variables_is_default() {
        assert_eq!(EngineConfig::from_lookup(lookup(&[])).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_bad_flag_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_ENABLED, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == ENV_ENABLED));
    }

    #[test]
    fn test_bad_target_rejected() {
        assert!("loud".parse::<DiagnosticTarget>().is_err());
        assert_eq!("SILENT".parse::<DiagnosticTarget>().unwrap(), DiagnosticTarget::Silent);
    }

    #[test]
    fn test_stack_size_bounds() {
        assert!(EngineConfig::default().with_replay_stack_size(1024).validate().is_err());
        assert!(EngineConfig::default()
            .with_replay_stack_size(MIN_REPLAY_STACK_SIZE)
            .validate()
            .is_ok());
        let err = EngineConfig::from_lookup(lookup(&[(ENV_REPLAY_STACK_SIZE, "lots")])).unwrap_err();
        assert!(err.to_string().contains(ENV_REPLAY_STACK_SIZE));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let err = EngineConfig::default()
            .with_replay_thread_prefix("  ")
            .validate()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for replay_thread_prefix: must not be empty"
        );
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = EngineConfig::default()
            .with_enabled(false)
            .with_diagnostics(DiagnosticTarget::Tracing)
            .with_register_suppressions(false);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"tracing\""));
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }
}
