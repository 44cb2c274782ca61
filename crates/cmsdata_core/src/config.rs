//! Engine configuration.
//!
//! # Invariants
//! - Every field has a default, so `{}` is a complete configuration.
//! - Configuration is validated once, when a provider is opened.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Default bound on bound parameters per statement.
pub const DEFAULT_MAX_QUERY_PARAMETERS: usize = 2000;
/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// What dropping a unit of work with pending operations does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposePolicy {
    /// Pending operations are dropped without storage effect.
    #[default]
    Discard,
    /// Pending operations are flushed; failures are reported to diagnostics.
    Flush,
}

/// Configuration shared by a provider and the units of work it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub dispose_policy: DisposePolicy,
    /// Identity lists longer than this are split into several statements.
    pub max_query_parameters: usize,
    /// When false, providers hand out a disabled cache.
    pub cache_enabled: bool,
    pub busy_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispose_policy: DisposePolicy::default(),
            max_query_parameters: DEFAULT_MAX_QUERY_PARAMETERS,
            cache_enabled: true,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Parses and validates configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_query_parameters == 0 {
            return Err(ConfigError::Invalid {
                field: "max_query_parameters",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid engine configuration: {message}"),
            Self::Invalid { field, message } => {
                write!(f, "invalid engine configuration `{field}`: {message}")
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, DisposePolicy, EngineConfig, DEFAULT_MAX_QUERY_PARAMETERS};

    #[test]
    fn empty_json_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_query_parameters, DEFAULT_MAX_QUERY_PARAMETERS);
        assert_eq!(config.dispose_policy, DisposePolicy::Discard);
    }

    #[test]
    fn json_overrides_selected_fields() {
        let config = EngineConfig::from_json_str(
            r#"{"dispose_policy": "flush", "cache_enabled": false, "max_query_parameters": 50}"#,
        )
        .unwrap();
        assert_eq!(config.dispose_policy, DisposePolicy::Flush);
        assert!(!config.cache_enabled);
        assert_eq!(config.max_query_parameters, 50);
    }

    #[test]
    fn zero_parameter_limit_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"max_query_parameters": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_query_parameters",
                ..
            }
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{"cache": true}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
