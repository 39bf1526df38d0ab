//! Workflow configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FLOWSTATE_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-workflow engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Label recorded on the workflow's tracing span.
    pub name: String,
    /// Log every state transition at debug level.
    pub log_transitions: bool,
    /// Warn when this many events are waiting to be received (0 = never).
    pub event_backlog_warn: usize,
    /// Warn when a subscriber has this many unread states (0 = never).
    pub subscriber_backlog_warn: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: "workflow".to_string(),
            log_transitions: false,
            event_backlog_warn: 1024,
            subscriber_backlog_warn: 1024,
        }
    }
}

impl WorkflowConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FLOWSTATE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: WorkflowConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Returns a copy with a different span label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("FLOWSTATE_NAME") {
            if !name.is_empty() {
                self.name = name;
            }
        }

        if let Ok(enabled) = std::env::var("FLOWSTATE_LOG_TRANSITIONS") {
            self.log_transitions = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Ok(n) = std::env::var("FLOWSTATE_EVENT_BACKLOG_WARN") {
            if let Ok(n) = n.parse() {
                self.event_backlog_warn = n;
            }
        }

        if let Ok(n) = std::env::var("FLOWSTATE_SUBSCRIBER_BACKLOG_WARN") {
            if let Ok(n) = n.parse() {
                self.subscriber_backlog_warn = n;
            }
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "workflow name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Failure to load, save or validate a [`WorkflowConfig`].
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "cannot access workflow config '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "malformed workflow config '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => write!(f, "invalid workflow config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.name, "workflow");
        assert!(!config.log_transitions);
        assert_eq!(config.event_backlog_warn, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flowstate.yaml");
        std::fs::write(&path, "name: checkout\nlog_transitions: true\n").unwrap();

        let config = WorkflowConfig::from_file(&path).unwrap();
        assert_eq!(config.name, "checkout");
        assert!(config.log_transitions);
        assert_eq!(config.subscriber_backlog_warn, 1024);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flowstate.yaml");
        let config = WorkflowConfig {
            event_backlog_warn: 0,
            ..WorkflowConfig::default().with_name("billing")
        };
        config.save(&path).unwrap();

        assert_eq!(WorkflowConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_errors() {
        let dir = TempDir::new().unwrap();

        let missing = WorkflowConfig::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::IoError(..))));

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "event_backlog_warn: lots\n").unwrap();
        assert!(matches!(
            WorkflowConfig::from_file(&path),
            Err(ConfigError::ParseError(..))
        ));

        std::fs::write(&path, "name: '  '\n").unwrap();
        let err = WorkflowConfig::from_file(&path).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid workflow config: workflow name must not be empty"
        );

        let err = WorkflowConfig::from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().starts_with("cannot access workflow config '"));
    }

    const ENV_VARS: [&str; 5] = [
        "FLOWSTATE_CONFIG",
        "FLOWSTATE_NAME",
        "FLOWSTATE_LOG_TRANSITIONS",
        "FLOWSTATE_EVENT_BACKLOG_WARN",
        "FLOWSTATE_SUBSCRIBER_BACKLOG_WARN",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    // Environment variables are process-wide, so every env scenario lives in
    // this one test.
    #[test]
    fn test_env_layering() {
        clear_env();
        assert_eq!(WorkflowConfig::from_env(), WorkflowConfig::default());
        assert_eq!(WorkflowConfig::load().unwrap(), WorkflowConfig::default());

        std::env::set_var("FLOWSTATE_NAME", "orders");
        std::env::set_var("FLOWSTATE_LOG_TRANSITIONS", "TRUE");
        std::env::set_var("FLOWSTATE_EVENT_BACKLOG_WARN", "lots");
        std::env::set_var("FLOWSTATE_SUBSCRIBER_BACKLOG_WARN", "16");
        let config = WorkflowConfig::from_env();
        assert_eq!(config.name, "orders");
        assert!(config.log_transitions);
        assert_eq!(config.event_backlog_warn, 1024);
        assert_eq!(config.subscriber_backlog_warn, 16);

        // File values sit between defaults and env overrides.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flowstate.yaml");
        std::fs::write(
            &path,
            "name: billing\nevent_backlog_warn: 8\nsubscriber_backlog_warn: 4\n",
        )
        .unwrap();
        std::env::set_var("FLOWSTATE_CONFIG", &path);
        std::env::set_var("FLOWSTATE_NAME", "");
        std::env::set_var("FLOWSTATE_LOG_TRANSITIONS", "0");
        let config = WorkflowConfig::load().unwrap();
        assert_eq!(config.name, "billing");
        assert!(!config.log_transitions);
        assert_eq!(config.event_backlog_warn, 8);
        assert_eq!(config.subscriber_backlog_warn, 16);

        std::env::set_var("FLOWSTATE_CONFIG", dir.path().join("missing.yaml"));
        assert!(matches!(
            WorkflowConfig::load(),
            Err(ConfigError::IoError(..))
        ));

        clear_env();
    }
}
