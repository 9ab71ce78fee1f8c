//! Command-line composition for the downstream program.
//!
//! The composed command has the shape
//! `<interpreter> <program> <verb> --<name>=<value> ...`, with one flag per
//! parameter in name order.
//!
//! Values are inserted verbatim. No shell escaping is applied, so callers
//! passing untrusted parameter values accept the injection risk of the shell
//! that runs the command.

use std::path::Path;

use crate::core::params::ParameterMap;

/// Interpreter used when none is configured.
pub const DEFAULT_INTERPRETER: &str = "python";

/// Builds the shell command that runs a flow program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComposer {
    interpreter: String,
}

impl CommandComposer {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Compose `<interpreter> <program_path> <base_command><flags>`.
    pub fn compose(
        &self,
        base_command: &str,
        program_path: &Path,
        params: &ParameterMap,
    ) -> String {
        let mut command = format!("{} {}", self.interpreter, program_path.display());
        let base_command = base_command.trim();
        if !base_command.is_empty() {
            command.push(' ');
            command.push_str(base_command);
        }
        command.push_str(&render_flags(params));
        command
    }
}

impl Default for CommandComposer {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

/// Render every parameter as ` --<name>=<value>`.
pub fn render_flags(params: &ParameterMap) -> String {
    params
        .iter()
        .map(|(name, value)| format!(" --{}={}", name, value))
        .collect()
}
