//! Outcome of one lifecycle step
//!
//! A target accumulates an ordered list of these while it runs. The list is
//! append-only and is frozen once the target reaches a terminal phase.

use serde::{Deserialize, Serialize};

/// Marker placed in `stderr` when a command exceeded its timeout
pub const TIMEOUT_MARKER: &str = "Timeout";

/// Marker placed in `stderr` when a command was killed by an abort
pub const ABORT_MARKER: &str = "Aborted";

/// Result of a single lifecycle step (start or probe)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    /// Human readable step description (e.g. "vagrant up", "test.py")
    pub description: String,
    /// Whether the step passed
    pub success: bool,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error (or an error marker)
    pub stderr: String,
}

impl RunResult {
    /// Create a result from captured output and an exit code
    pub fn from_exit(
        description: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            success: exit_code == 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a failed result that never ran a command
    pub fn failure(description: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// True if this step failed because its command timed out
    pub fn is_timeout(&self) -> bool {
        !self.success && self.stderr == TIMEOUT_MARKER
    }

    /// Short PASS/FAIL label
    pub fn verdict(&self) -> &'static str {
        if self.success { "PASS" } else { "FAIL" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_exit() {
        let ok = RunResult::from_exit("vagrant up", 0, "booted", "");
        assert!(ok.success);
        assert_eq!(ok.verdict(), "PASS");

        let bad = RunResult::from_exit("test.py", 2, "", "assertion failed");
        assert!(!bad.success);
        assert_eq!(bad.verdict(), "FAIL");
        assert!(!bad.is_timeout());
    }

    #[test]
    fn test_timeout_marker() {
        let result = RunResult::from_exit("test.py", 1, "", TIMEOUT_MARKER);
        assert!(result.is_timeout());
    }

    #[test]
    fn test_failure_constructor() {
        let result = RunResult::failure("test.py not found", "No test.py file");
        assert!(!result.success);
        assert!(result.stdout.is_empty());
        assert_eq!(result.stderr, "No test.py file");
    }

    #[test]
    fn test_serialization() {
        let result = RunResult::from_exit("test.py", 0, "ok", "");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"description\":\"test.py\""));
        assert!(json.contains("\"success\":true"));

        let parsed: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }
}
