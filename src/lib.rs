//! bundlerun - fetch a flow bundle, run it once, hand back its output.
//!
//! A [`BundleTask`] optionally downloads a repository archive, extracts it
//! into a clean folder, composes `<interpreter> <program> <verb> --k=v ...`,
//! runs that through a shell and reduces stdout to the last line (or all of
//! it). Any exit code other than 0 fails the run.

pub mod archive;
pub mod config;
pub mod core;
pub mod execution;
pub mod workspace;

pub use archive::{ArchiveSource, FetchedArchive, GithubArchiveFetcher, GithubConfig};
pub use config::{ConfigError, TaskConfig, TaskConfigBuilder, YamlLoader, load_task};
pub use core::environment::Environment;
pub use core::error::TaskError;
pub use core::params::{ParamValue, ParameterMap};
pub use core::types::{BundleRef, Credential, RepoRef, RunId};
pub use execution::{
    BundleTask, BundleTaskBuilder, CommandComposer, ExecutionResult, ExecutionSpec, RunOptions,
    ShellExecutor, Staging, TaskOutput, TaskRun, TaskState,
};
pub use workspace::{Workspace, WorkspaceState};
