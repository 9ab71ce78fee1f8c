//! Configuration type definitions.
//!
//! Keys are snake_case. The camelCase spellings used by older task files
//! (`flowPath`, `repoRef`, `cloneFolder`, ...) are accepted as aliases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::params::ParameterMap;

/// Environment variable holding the archive API token unless overridden.
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// A single task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name used in logs. Defaults to the flow path.
    pub name: Option<String>,
    /// Program to run. Relative to the bundle root when `repo` is set.
    #[serde(alias = "flowPath")]
    pub flow_path: String,
    /// Bundle repository as `owner/name`.
    #[serde(alias = "repoRef")]
    pub repo: Option<String>,
    /// Branch, tag or commit to download. Default branch when unset.
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    /// Folder the bundle is extracted into. Required iff `repo` is set.
    #[serde(alias = "cloneFolder")]
    pub clone_folder: Option<String>,
    /// Shell that runs the composed command.
    #[serde(alias = "shellInterpreter")]
    pub shell: Option<String>,
    /// Interpreter for the flow program.
    pub interpreter: Option<String>,
    /// Verb passed to the program.
    pub command: Option<String>,
    #[serde(default, alias = "returnAll")]
    pub return_all: bool,
    #[serde(default, alias = "logStderrOnFailure")]
    pub log_stderr_on_failure: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Shell text run before the command.
    #[serde(alias = "preludeScript")]
    pub prelude_script: Option<String>,
    #[serde(alias = "workingDir")]
    pub working_dir: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Default parameters; command-line parameters override them.
    #[serde(default)]
    pub params: ParameterMap,
    #[serde(default)]
    pub github: GithubSettings,
}

impl TaskConfig {
    /// Whether the task downloads a bundle before running.
    pub fn is_staged(&self) -> bool {
        self.repo.is_some()
    }
}

/// Archive API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    /// API base URL. `https://api.github.com` when unset.
    pub api_url: Option<String>,
    /// Environment variable the token is read from.
    pub token_env: String,
    /// Download timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            timeout_secs: None,
        }
    }
}
