//! The fetch-stage-execute-capture task.
//!
//! [`BundleTask`] runs a flow program once per call:
//!
//! ```text
//! Idle -> Staging -> Composing -> Executing -> Reducing -> Succeeded
//!           |            |            |            |
//!           +------------+------------+------------+----> Failed
//! ```
//!
//! Staging only happens when the task was built with a [`Staging`]
//! (a bundle to download and a clone folder to extract it into). The program
//! path is then resolved inside the freshly extracted bundle. Without one,
//! the configured flow path is run as is.
//!
//! # Example
//!
//! ```no_run
//! use bundlerun::{BundleTask, ParameterMap};
//!
//! # async fn demo() -> Result<(), bundlerun::TaskError> {
//! let task = BundleTask::builder("flows/summation_flow.py")
//!     .name("summation")
//!     .env("METAFLOW_PROFILE", "metaflow")
//!     .build();
//!
//! let output = task.run(&ParameterMap::new().with("sum", 9)).await?;
//! println!("{:?}", output);
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Every stage failure ends the run with the matching [`TaskError`]. A program
//! that exits non-zero yields [`TaskError::NonZeroExit`] with its exit code,
//! whatever it printed. Nothing is retried here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, error, info, info_span, warn};

use super::compose::CommandComposer;
use super::process::{ExecutionSpec, ShellExecutor};
use super::reduce::{TaskOutput, last_line, reduce};
use crate::archive::ArchiveSource;
use crate::core::environment::Environment;
use crate::core::error::TaskError;
use crate::core::params::ParameterMap;
use crate::core::types::{BundleRef, RunId};
use crate::workspace::Workspace;

/// Default verb passed to the flow program.
pub const DEFAULT_COMMAND: &str = "run";

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Staging,
    Composing,
    Executing,
    Reducing,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Idle => "idle",
            TaskState::Staging => "staging",
            TaskState::Composing => "composing",
            TaskState::Executing => "executing",
            TaskState::Reducing => "reducing",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A remote bundle plus the local folder it is staged into.
#[derive(Clone)]
pub struct Staging {
    source: Arc<dyn ArchiveSource>,
    bundle: BundleRef,
    clone_folder: PathBuf,
}

impl Staging {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        bundle: BundleRef,
        clone_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            bundle,
            clone_folder: clone_folder.into(),
        }
    }

    pub fn bundle(&self) -> &BundleRef {
        &self.bundle
    }

    pub fn clone_folder(&self) -> &Path {
        &self.clone_folder
    }

    /// Download the bundle, wipe the clone folder and extract into it.
    ///
    /// The download happens first, so a failed fetch leaves the folder alone.
    /// The returned root is absolute, so it stays valid as a working directory.
    async fn stage(&self) -> Result<PathBuf, TaskError> {
        let archive = self.source.fetch(&self.bundle).await?;
        let folder = std::path::absolute(&self.clone_folder)
            .map_err(|e| TaskError::workspace(&self.clone_folder, e))?;
        let mut workspace = Workspace::new(folder);
        workspace.prepare().await?;
        workspace.extract(archive).await
    }
}

impl fmt::Debug for Staging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Staging")
            .field("bundle", &self.bundle)
            .field("clone_folder", &self.clone_folder)
            .finish_non_exhaustive()
    }
}

/// Per-invocation overrides of the task's configured values.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Replaces the configured verb.
    pub command: Option<String>,
    /// Merged over the configured environment; these keys win.
    pub environment: Option<Environment>,
    /// Replaces the configured prelude.
    pub prelude: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.environment = Some(env);
        self
    }

    pub fn prelude(mut self, prelude: impl Into<String>) -> Self {
        self.prelude = Some(prelude.into());
        self
    }
}

/// Report of a single invocation.
#[derive(Debug)]
pub struct TaskRun {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// States visited, starting at `Idle` and ending in a terminal state.
    pub states: Vec<TaskState>,
    /// Composed command, once composition was reached.
    pub command: Option<String>,
    /// Exit code, once the program ran to completion.
    pub exit_code: Option<i32>,
    pub result: Result<Option<TaskOutput>, TaskError>,
}

impl TaskRun {
    /// Final state of the run.
    pub fn state(&self) -> TaskState {
        self.states.last().copied().unwrap_or(TaskState::Idle)
    }

    pub fn succeeded(&self) -> bool {
        self.state() == TaskState::Succeeded
    }

    pub fn into_result(self) -> Result<Option<TaskOutput>, TaskError> {
        self.result
    }
}

#[derive(Default)]
struct Progress {
    states: Vec<TaskState>,
    command: Option<String>,
    exit_code: Option<i32>,
}

impl Progress {
    fn enter(&mut self, state: TaskState) {
        tracing::debug!(%state, "entering state");
        self.states.push(state);
    }
}

/// Runs a flow program, optionally after staging it from a remote bundle.
///
/// The task holds no state between invocations; each call starts at
/// [`TaskState::Idle`].
#[derive(Debug, Clone)]
pub struct BundleTask {
    name: String,
    flow_path: PathBuf,
    command: String,
    composer: CommandComposer,
    executor: ShellExecutor,
    environment: Environment,
    prelude: Option<String>,
    working_dir: Option<PathBuf>,
    return_all: bool,
    log_stderr_on_failure: bool,
    staging: Option<Staging>,
}

impl BundleTask {
    /// Create a new builder for the program at `flow_path`.
    ///
    /// When the task stages a bundle, `flow_path` is relative to the bundle root.
    pub fn builder(flow_path: impl Into<PathBuf>) -> BundleTaskBuilder {
        BundleTaskBuilder::new(flow_path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flow_path(&self) -> &Path {
        &self.flow_path
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn composer(&self) -> &CommandComposer {
        &self.composer
    }

    pub fn executor(&self) -> &ShellExecutor {
        &self.executor
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn prelude(&self) -> Option<&str> {
        self.prelude.as_deref()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn return_all(&self) -> bool {
        self.return_all
    }

    pub fn log_stderr_on_failure(&self) -> bool {
        self.log_stderr_on_failure
    }

    pub fn staging(&self) -> Option<&Staging> {
        self.staging.as_ref()
    }

    /// Run once and return the reduced output.
    pub async fn run(&self, params: &ParameterMap) -> Result<Option<TaskOutput>, TaskError> {
        self.execute(params, RunOptions::default()).await.into_result()
    }

    /// Run once with overrides and return the full report.
    pub async fn execute(&self, params: &ParameterMap, options: RunOptions) -> TaskRun {
        let run_id = RunId::new();
        let span = info_span!("bundle_task", task = %self.name, run = %run_id);

        async move {
            let started_at = Utc::now();
            let start = Instant::now();
            let mut progress = Progress::default();
            progress.enter(TaskState::Idle);

            let result = self.drive(&mut progress, params, options).await;
            match &result {
                Ok(_) => {
                    progress.enter(TaskState::Succeeded);
                    info!(elapsed = ?start.elapsed(), "run succeeded");
                }
                Err(e) => {
                    progress.enter(TaskState::Failed);
                    warn!(kind = e.kind(), error = %e, "run failed");
                }
            }

            TaskRun {
                run_id,
                started_at,
                duration: start.elapsed(),
                states: progress.states,
                command: progress.command,
                exit_code: progress.exit_code,
                result,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        progress: &mut Progress,
        params: &ParameterMap,
        options: RunOptions,
    ) -> Result<Option<TaskOutput>, TaskError> {
        let mut program = self.flow_path.clone();
        let mut staged_root = None;
        if let Some(staging) = &self.staging {
            progress.enter(TaskState::Staging);
            info!(
                repo = %staging.bundle.repo(),
                folder = %staging.clone_folder.display(),
                "staging bundle"
            );
            let root = staging.stage().await?;
            program = root.join(&self.flow_path);
            staged_root = Some(root);
        }

        progress.enter(TaskState::Composing);
        let verb = options.command.as_deref().unwrap_or(&self.command);
        let command = self.composer.compose(verb, &program, params);
        info!(started_at = %Utc::now(), %command, "starting flow run");
        progress.command = Some(command.clone());

        let environment = match &options.environment {
            Some(extra) => self.environment.merged_with(extra),
            None => self.environment.clone(),
        };
        let spec = ExecutionSpec {
            command,
            environment,
            prelude: options.prelude.or_else(|| self.prelude.clone()),
            working_dir: self.working_dir.clone().or(staged_root),
        };

        progress.enter(TaskState::Executing);
        let result = self.executor.execute(&spec).await?;
        progress.exit_code = Some(result.exit_code);

        progress.enter(TaskState::Reducing);
        if result.success() {
            return Ok(reduce(&result.stdout, self.return_all));
        }

        if self.log_stderr_on_failure {
            for line in &result.stderr {
                error!(stderr = %line);
            }
        }
        Err(TaskError::NonZeroExit {
            code: result.exit_code,
            stderr: self.log_stderr_on_failure.then(|| result.stderr_text()),
            last_output: last_line(&result.stdout).map(str::to_string),
        })
    }
}

/// Builder for creating `BundleTask` instances.
#[derive(Debug, Clone)]
pub struct BundleTaskBuilder {
    name: Option<String>,
    flow_path: PathBuf,
    command: String,
    composer: CommandComposer,
    executor: ShellExecutor,
    environment: Environment,
    prelude: Option<String>,
    working_dir: Option<PathBuf>,
    return_all: bool,
    log_stderr_on_failure: bool,
    staging: Option<Staging>,
}

impl BundleTaskBuilder {
    pub fn new(flow_path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            flow_path: flow_path.into(),
            command: DEFAULT_COMMAND.to_string(),
            composer: CommandComposer::default(),
            executor: ShellExecutor::default(),
            environment: Environment::default(),
            prelude: None,
            working_dir: None,
            return_all: false,
            log_stderr_on_failure: false,
            staging: None,
        }
    }

    /// Set the task name (used in logs).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the verb passed to the program (default `run`).
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Set the program interpreter (default `python`).
    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.composer = CommandComposer::new(interpreter);
        self
    }

    /// Set the shell that runs the composed command (default `sh`).
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        let timeout = self.executor.timeout();
        self.executor = ShellExecutor::new(shell);
        if let Some(limit) = timeout {
            self.executor = self.executor.with_timeout(limit);
        }
        self
    }

    /// Kill the program and fail the run after `limit`.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.executor = self.executor.with_timeout(limit);
        self
    }

    /// Set environment variables.
    pub fn environment(mut self, env: Environment) -> Self {
        self.environment = env;
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.set(key, value);
        self
    }

    /// Shell text run before the command, in the same shell process.
    pub fn prelude(mut self, script: impl Into<String>) -> Self {
        self.prelude = Some(script.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Return every stdout line instead of only the last one.
    pub fn return_all(mut self, return_all: bool) -> Self {
        self.return_all = return_all;
        self
    }

    /// Log stderr and attach it to the error when the program fails.
    pub fn log_stderr_on_failure(mut self, enabled: bool) -> Self {
        self.log_stderr_on_failure = enabled;
        self
    }

    /// Fetch and extract a bundle before every run.
    pub fn staging(mut self, staging: Staging) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn build(self) -> BundleTask {
        let name = self
            .name
            .unwrap_or_else(|| self.flow_path.display().to_string());
        BundleTask {
            name,
            flow_path: self.flow_path,
            command: self.command,
            composer: self.composer,
            executor: self.executor,
            environment: self.environment,
            prelude: self.prelude,
            working_dir: self.working_dir,
            return_all: self.return_all,
            log_stderr_on_failure: self.log_stderr_on_failure,
            staging: self.staging,
        }
    }
}
