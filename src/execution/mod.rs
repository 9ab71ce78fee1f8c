//! Task execution.
//!
//! Composing the program's command line, running it through a shell,
//! reducing its output, and the [`BundleTask`] that ties those steps to
//! bundle staging.

mod bundle_task;
mod compose;
mod process;
mod reduce;

pub use bundle_task::{
    BundleTask, BundleTaskBuilder, DEFAULT_COMMAND, RunOptions, Staging, TaskRun, TaskState,
};
pub use compose::{CommandComposer, DEFAULT_INTERPRETER, render_flags};
pub use process::{DEFAULT_SHELL, ExecutionResult, ExecutionSpec, ShellExecutor};
pub use reduce::{TaskOutput, last_line, reduce};
