//! Errors raised while loading a task definition.

use std::path::PathBuf;
use thiserror::Error;

/// Task definition could not be loaded or is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The task file could not be read.
    #[error("failed to read task file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// The task file is not valid YAML, or does not match [`TaskConfig`](super::TaskConfig).
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required value is absent (including a token for a staged task).
    #[error("missing required field: {0}")]
    MissingField(String),
}
