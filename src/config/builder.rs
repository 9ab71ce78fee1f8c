//! Task builder from YAML configuration.
//!
//! This module converts a [`TaskConfig`] into a runnable [`BundleTask`].

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::archive::{GithubArchiveFetcher, GithubConfig};
use crate::core::environment::Environment;
use crate::core::types::{BundleRef, Credential, RepoRef};
use crate::execution::{BundleTask, Staging};

use super::error::ConfigError;
use super::types::TaskConfig;
use super::yaml::YamlLoader;

/// Builder for creating tasks from YAML configuration.
pub struct TaskConfigBuilder;

impl TaskConfigBuilder {
    /// Build a task from its configuration.
    ///
    /// `credential` is required when the task stages a bundle and ignored
    /// otherwise.
    pub fn build(
        config: &TaskConfig,
        credential: Option<Credential>,
    ) -> Result<BundleTask, ConfigError> {
        let mut builder = BundleTask::builder(&config.flow_path)
            .return_all(config.return_all)
            .log_stderr_on_failure(config.log_stderr_on_failure);

        if let Some(name) = &config.name {
            builder = builder.name(name);
        }
        if let Some(command) = &config.command {
            builder = builder.command(command);
        }
        if let Some(interpreter) = &config.interpreter {
            builder = builder.interpreter(interpreter);
        }
        if let Some(shell) = &config.shell {
            builder = builder.shell(shell);
        }
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let env: Environment = config.env.iter().collect();
        builder = builder.environment(env);

        if let Some(prelude) = &config.prelude_script {
            builder = builder.prelude(prelude);
        }
        if let Some(dir) = &config.working_dir {
            builder = builder.working_dir(dir);
        }

        if let Some(staging) = Self::build_staging(config, credential)? {
            builder = builder.staging(staging);
        }

        Ok(builder.build())
    }

    /// Pick the credential: an explicit token wins over the configured
    /// environment variable.
    pub fn resolve_credential(config: &TaskConfig, explicit: Option<&str>) -> Option<Credential> {
        explicit
            .map(str::to_string)
            .or_else(|| std::env::var(&config.github.token_env).ok())
            .filter(|token| !token.is_empty())
            .map(Credential::new)
    }

    fn build_staging(
        config: &TaskConfig,
        credential: Option<Credential>,
    ) -> Result<Option<Staging>, ConfigError> {
        let (Some(repo), Some(clone_folder)) = (&config.repo, &config.clone_folder) else {
            return Ok(None);
        };

        let repo = RepoRef::from_str(repo)
            .map_err(|e| ConfigError::InvalidConfig(format!("invalid repo '{}': {}", repo, e)))?;
        let credential = credential.ok_or_else(|| {
            ConfigError::MissingField(format!(
                "token for {} (set {} or pass --token)",
                repo, config.github.token_env
            ))
        })?;

        let mut bundle = BundleRef::new(repo, credential);
        if let Some(git_ref) = &config.git_ref {
            bundle = bundle.with_git_ref(git_ref);
        }

        let mut github = GithubConfig::default();
        if let Some(url) = &config.github.api_url {
            github = github.with_api_url(url);
        }
        if let Some(secs) = config.github.timeout_secs {
            github = github.with_timeout(Duration::from_secs(secs));
        }
        let fetcher = GithubArchiveFetcher::new(github).map_err(|e| {
            ConfigError::InvalidConfig(format!("failed to create HTTP client: {}", e))
        })?;

        Ok(Some(Staging::new(Arc::new(fetcher), bundle, clone_folder)))
    }
}

/// Load, validate and build a task from a YAML file.
pub fn load_task(
    path: impl AsRef<Path>,
    token: Option<&str>,
) -> Result<(TaskConfig, BundleTask), ConfigError> {
    let config = YamlLoader::load_task_config(path)?;
    let credential = TaskConfigBuilder::resolve_credential(&config, token);
    let task = TaskConfigBuilder::build(&config, credential)?;
    Ok((config, task))
}
