//! Execution outcome and its normalized report

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Note appended to the merged output when a stream hit the capture limit
pub const TRUNCATION_NOTE: &str = "[output truncated]";

/// Result of running one command in a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Standard output, lossily decoded as UTF-8
    pub stdout: String,

    /// Standard error, lossily decoded as UTF-8
    pub stderr: String,

    /// Exit code; `None` when the process was ended by a signal
    pub exit_code: Option<i32>,

    /// Name of the terminating signal, e.g. `SIGKILL`
    pub signal: Option<String>,

    /// Whether the process was killed at the deadline
    pub timed_out: bool,

    /// Whether either stream exceeded the capture limit
    pub truncated: bool,

    /// Wall-clock time from spawn to termination
    pub duration: Duration,
}

impl ExecutionOutcome {
    /// Exit code 0 and not killed at the deadline
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Shape this outcome into the response contract
    #[must_use]
    pub fn report(&self) -> RunReport {
        RunReport::from(self)
    }
}

/// Normalized view returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub stdout: String,
    pub stderr: String,
    /// stdout followed by stderr, both trimmed, empty parts left out
    pub output: String,
    pub code: Option<i32>,
    pub signal: Option<String>,
    /// Ran to completion, possibly with a runtime error
    pub exited: bool,
    pub timed_out: bool,
}

impl From<&ExecutionOutcome> for RunReport {
    fn from(outcome: &ExecutionOutcome) -> Self {
        let mut output = [outcome.stdout.trim(), outcome.stderr.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if outcome.truncated {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(TRUNCATION_NOTE);
        }

        Self {
            stdout: outcome.stdout.trim_end().to_string(),
            stderr: outcome.stderr.clone(),
            output,
            code: outcome.exit_code,
            signal: outcome.signal.clone(),
            exited: !outcome.timed_out,
            timed_out: outcome.timed_out,
        }
    }
}
