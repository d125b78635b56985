//! Configuration loading and validation for Stepwise loops.
//!
//! Loads a [`LoopConfig`] from a TOML file with environment variable
//! overrides. Every field has a default, so a missing file or an empty table
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Model request settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Hard limits enforced by continuation criteria
    #[serde(default)]
    pub limits: LimitsConfig,

    /// How step errors affect continuation
    #[serde(default)]
    pub errors: ErrorsConfig,

    /// Tool executor behaviour
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Message history management
    #[serde(default)]
    pub history: HistoryConfig,

    /// Finish reasons that stop the loop (e.g. "length", "content_filter")
    #[serde(default)]
    pub finish_reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// System prompt placed in the cached context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: None,
        }
    }
}

/// Limits; `0` disables a limit except for `max_steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default)]
    pub max_tokens: u64,

    /// Seconds since the current execution started
    #[serde(default)]
    pub max_execution_secs: u64,

    /// Seconds since the state was first created
    #[serde(default)]
    pub max_session_secs: u64,

    /// Seconds spent inside steps, across resumed executions
    #[serde(default)]
    pub max_cumulative_secs: u64,
}

fn default_max_steps() -> usize {
    20
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tokens: 0,
            max_execution_secs: 0,
            max_session_secs: 0,
            max_cumulative_secs: 0,
        }
    }
}

/// Error handling policy names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicyKind {
    #[default]
    StopOnAnyError,
    RetryToolErrors,
    IgnoreToolErrors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorsConfig {
    #[serde(default)]
    pub policy: ErrorPolicyKind,

    /// Consecutive error steps tolerated by `retry_tool_errors`
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_max_retries() -> usize {
    3
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            policy: ErrorPolicyKind::default(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Re-raise the first tool failure after the batch completes
    #[serde(default)]
    pub throw_on_failure: bool,

    /// Run a batch of tool calls concurrently
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Keep at most this many non-system messages (0 = unlimited)
    #[serde(default)]
    pub max_messages: usize,

    /// Summarize older messages above this estimated token count (0 = never)
    #[serde(default)]
    pub summarize_above_tokens: usize,

    /// Most recent non-system messages kept verbatim when summarizing
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_keep_recent() -> usize {
    6
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 0,
            summarize_above_tokens: 0,
            keep_recent: default_keep_recent(),
        }
    }
}

impl LoopConfig {
    /// Load configuration from a specific file path.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml_at(&content, path)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Self::from_toml_at(content, Path::new("<inline>"))
    }

    fn from_toml_at(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Environment variable overrides (highest priority):
    /// - `STEPWISE_MAX_STEPS`
    /// - `STEPWISE_MAX_TOKENS`
    /// - `STEPWISE_MODEL`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("STEPWISE_MAX_STEPS") {
            self.limits.max_steps = parse_env("STEPWISE_MAX_STEPS", &raw)?;
        }
        if let Some(raw) = lookup("STEPWISE_MAX_TOKENS") {
            self.limits.max_tokens = parse_env("STEPWISE_MAX_TOKENS", &raw)?;
        }
        if let Some(model) = lookup("STEPWISE_MODEL") {
            self.model.model = model;
        }
        self.validate()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.limits.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_steps must be > 0".into(),
            ));
        }

        if self.history.keep_recent == 0 {
            return Err(ConfigError::ValidationError(
                "history.keep_recent must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Render the default configuration as TOML.
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Conventional location: `./stepwise.toml`.
    pub fn default_path() -> PathBuf {
        PathBuf::from("stepwise.toml")
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            limits: LimitsConfig::default(),
            errors: ErrorsConfig::default(),
            tools: ToolsConfig::default(),
            history: HistoryConfig::default(),
            finish_reasons: Vec::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has an invalid value: {raw}")))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = LoopConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.max_steps, 20);
        assert_eq!(config.errors.policy, ErrorPolicyKind::StopOnAnyError);
        assert!(!config.tools.throw_on_failure);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = LoopConfig::default();
        let parsed = LoopConfig::from_toml(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_tables_fill_defaults() {
        let config = LoopConfig::from_toml(
            r#"
finish_reasons = ["length"]

[limits]
max_steps = 5
max_tokens = 1000

[errors]
policy = "retry_tool_errors"
max_retries = 2

[tools]
throw_on_failure = true
"#,
        )
        .unwrap();
        assert_eq!(config.limits.max_steps, 5);
        assert_eq!(config.limits.max_tokens, 1000);
        assert_eq!(config.limits.max_execution_secs, 0);
        assert_eq!(config.errors.policy, ErrorPolicyKind::RetryToolErrors);
        assert_eq!(config.errors.max_retries, 2);
        assert!(config.tools.throw_on_failure);
        assert!(!config.tools.parallel);
        assert_eq!(config.finish_reasons, vec!["length".to_string()]);
        assert_eq!(config.history.keep_recent, 6);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = LoopConfig {
            model: ModelConfig {
                temperature: 5.0,
                ..ModelConfig::default()
            },
            ..LoopConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_steps_rejected() {
        let err = LoopConfig::from_toml("[limits]\nmax_steps = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = LoopConfig::from_toml("[limits\nmax_steps = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = LoopConfig::load_from(Path::new("/nonexistent/stepwise.toml")).unwrap();
        assert_eq!(config, LoopConfig::default());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepwise.toml");
        std::fs::write(&path, "[limits]\nmax_steps = 3\n").unwrap();
        let config = LoopConfig::load_from(&path).unwrap();
        assert_eq!(config.limits.max_steps, 3);
    }

    #[test]
    fn overrides_apply_and_validate() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STEPWISE_MAX_STEPS", "7"),
            ("STEPWISE_MODEL", "local-model"),
        ]);
        let mut config = LoopConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.limits.max_steps, 7);
        assert_eq!(config.model.model, "local-model");

        let mut config = LoopConfig::default();
        let err = config
            .apply_overrides(|k| (k == "STEPWISE_MAX_TOKENS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("STEPWISE_MAX_TOKENS"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = LoopConfig::default_toml();
        assert!(toml_str.contains("max_steps = 20"));
        assert!(toml_str.contains("stop_on_any_error"));
    }
}
