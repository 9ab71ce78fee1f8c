//! Output reduction: keep every stdout line, or only the last one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reduced task output handed to the next pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskOutput {
    /// Last non-empty stdout line.
    Line(String),
    /// Every stdout line, in order.
    Lines(Vec<String>),
}

impl TaskOutput {
    /// The single-line value, if this output was reduced to one line.
    pub fn as_line(&self) -> Option<&str> {
        match self {
            TaskOutput::Line(line) => Some(line),
            TaskOutput::Lines(_) => None,
        }
    }

    /// The full line sequence, if all lines were kept.
    pub fn as_lines(&self) -> Option<&[String]> {
        match self {
            TaskOutput::Line(_) => None,
            TaskOutput::Lines(lines) => Some(lines),
        }
    }
}

impl fmt::Display for TaskOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutput::Line(line) => f.write_str(line),
            TaskOutput::Lines(lines) => f.write_str(&lines.join("\n")),
        }
    }
}

/// Reduce captured stdout.
///
/// With `return_all` the lines come back unchanged. Otherwise only the last
/// non-empty line is kept, and `None` means the program printed nothing.
pub fn reduce(lines: &[String], return_all: bool) -> Option<TaskOutput> {
    if return_all {
        return Some(TaskOutput::Lines(lines.to_vec()));
    }
    last_line(lines).map(|line| TaskOutput::Line(line.to_string()))
}

/// Last line that is not blank. Trailing blank lines are skipped.
pub fn last_line(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(String::as_str)
}
