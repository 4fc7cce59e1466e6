//! Core types for the orchestrator
//!
//! Contains `TargetStatus` (the live, shared per-target state) and the
//! report types produced once a run is over.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use vmprobe_common::{RunResult, TargetPhase};

/// Process exit code when every target passed
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code when any target failed
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code after an interrupt-driven abort (128 + SIGINT)
pub const EXIT_ABORTED: i32 = 130;

/// Live state of one target during a run
#[derive(Debug, Clone, Default)]
pub struct TargetStatus {
    /// Current lifecycle phase
    pub phase: TargetPhase,
    /// Free-text progress annotation (e.g. " [VM started]")
    pub progress: String,
    /// When the controller picked the target up
    pub started_at: Option<Instant>,
    /// When the target reached a terminal phase
    pub finished_at: Option<Instant>,
    /// Recorded step results, in execution order
    pub results: Vec<RunResult>,
    /// Number of force-destroys issued for this target
    pub destroy_attempts: u32,
}

impl TargetStatus {
    /// Check if this target has reached a terminal phase
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Time spent on the target, frozen once it is terminal
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or(now);
        Some(end.saturating_duration_since(started))
    }
}

/// What a lifecycle controller hands back for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub phase: TargetPhase,
    pub results: Vec<RunResult>,
    pub destroy_attempted: bool,
}

/// Final per-target section of the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub phase: TargetPhase,
    pub results: Vec<RunResult>,
}

impl TargetReport {
    /// True when the lifecycle completed and every recorded step passed
    pub fn passed(&self) -> bool {
        self.phase == TargetPhase::Completed
            && !self.results.is_empty()
            && self.results.iter().all(|r| r.success)
    }
}

/// Aggregated outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// The abort flag was set during the run
    pub aborted: bool,
    /// One section per target, in discovery order
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    /// True when every target passed
    pub fn all_passed(&self) -> bool {
        self.targets.iter().all(TargetReport::passed)
    }

    /// Names of targets that did not pass
    pub fn failed_targets(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|t| !t.passed())
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Process exit code summarizing the run
    pub fn exit_code(&self) -> i32 {
        if self.aborted {
            EXIT_ABORTED
        } else if self.all_passed() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }
}
