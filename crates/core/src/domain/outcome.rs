// Outcome Classification

use super::action::Action;
use super::expectation::ExpectationTable;

/// Pass/fail verdict for one finished invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { code: Option<i32>, stderr: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Classify a finished process.
///
/// Failure is the default. It is cleared only for exit code 0 when the table
/// has a pattern for the action and that pattern matches `stderr`. An action
/// absent from the table therefore always fails, even with empty stderr.
pub fn classify(
    table: &ExpectationTable,
    action: &Action,
    exit_code: Option<i32>,
    stderr: &str,
) -> Outcome {
    if exit_code == Some(0) && table.accepts(action.as_str(), stderr) {
        return Outcome::Success;
    }

    Outcome::Failure {
        code: exit_code,
        stderr: stderr.to_string(),
    }
}
