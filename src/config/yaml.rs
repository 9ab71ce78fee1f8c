//! YAML configuration parsing.
//!
//! Parses task definitions from YAML files and validates them.

use std::path::Path;
use std::str::FromStr;

use super::error::ConfigError;
use super::types::TaskConfig;
use crate::core::types::RepoRef;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a task configuration from a file.
    pub fn load_task_config(path: impl AsRef<Path>) -> Result<TaskConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TaskConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_task_config(&config)?;
        Ok(config)
    }

    /// Parse a task configuration from a YAML string.
    pub fn parse_task_config(yaml: &str) -> Result<TaskConfig, ConfigError> {
        let config: TaskConfig = serde_yaml::from_str(yaml)?;
        Self::validate_task_config(&config)?;
        Ok(config)
    }

    /// Validate a task configuration.
    pub fn validate_task_config(config: &TaskConfig) -> Result<(), ConfigError> {
        if config.flow_path.trim().is_empty() {
            return Err(ConfigError::MissingField("flow_path".into()));
        }

        match (&config.repo, &config.clone_folder) {
            (Some(repo), Some(folder)) => {
                RepoRef::from_str(repo).map_err(|e| {
                    ConfigError::InvalidConfig(format!("invalid repo '{}': {}", repo, e))
                })?;
                if folder.trim().is_empty() {
                    return Err(ConfigError::MissingField("clone_folder".into()));
                }
            }
            (Some(_), None) => return Err(ConfigError::MissingField("clone_folder".into())),
            (None, Some(_)) => {
                return Err(ConfigError::InvalidConfig(
                    "clone_folder is only meaningful together with repo".into(),
                ));
            }
            (None, None) => {
                if config.git_ref.is_some() {
                    return Err(ConfigError::InvalidConfig(
                        "ref is only meaningful together with repo".into(),
                    ));
                }
            }
        }

        for (field, value) in [
            ("shell", &config.shell),
            ("interpreter", &config.interpreter),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ConfigError::InvalidConfig(format!("{} cannot be empty", field)));
            }
        }

        // A zero timeout would kill every run before it starts.
        if config.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig("timeout_secs cannot be zero".into()));
        }
        if config.github.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "github.timeout_secs cannot be zero".into(),
            ));
        }

        if let Some(key) = config.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(ConfigError::InvalidConfig(format!(
                "invalid environment variable name '{}'",
                key
            )));
        }

        Ok(())
    }
}
