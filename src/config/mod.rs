//! Configuration loading and parsing.
//!
//! This module provides YAML-based task definitions.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{TaskConfigBuilder, load_task};
pub use error::ConfigError;
pub use types::{DEFAULT_TOKEN_ENV, GithubSettings, TaskConfig};
pub use yaml::YamlLoader;
