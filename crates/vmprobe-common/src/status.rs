//! Lifecycle phases of a target
//!
//! A target moves strictly forward through
//! `Pending → Starting → Started → Probing → Probed → Destroying → Completed`,
//! with `Failed`, `Aborted` and `Errored` reachable from any non-terminal phase.

use serde::{Deserialize, Serialize};

/// Current phase of one target's lifecycle
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum TargetPhase {
    /// Not picked up by a controller yet
    #[default]
    Pending,
    /// Provisioning tool `up` is running
    Starting,
    /// VM is up
    Started,
    /// Probe is running inside the started VM
    Probing,
    /// Probe finished (pass or fail)
    Probed,
    /// Force-destroy is running
    Destroying,
    /// Lifecycle finished; probe outcome lives in the run results
    Completed,
    /// VM failed to start
    Failed,
    /// Abort flag observed before the lifecycle could finish
    Aborted,
    /// Unexpected error inside the controller
    Errored,
}

impl TargetPhase {
    /// Check if no further updates are expected for this phase
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Aborted | Self::Errored
        )
    }

    /// Check if a target in this phase may currently own a running VM
    ///
    /// Everything from the start attempt up to the end of teardown counts,
    /// since a half-finished `up` can leave a VM behind.
    pub fn may_hold_resource(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Started | Self::Probing | Self::Probed | Self::Destroying
        )
    }

    /// Position in the forward lifecycle, `None` for the off-path terminals
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Starting => Some(1),
            Self::Started => Some(2),
            Self::Probing => Some(3),
            Self::Probed => Some(4),
            Self::Destroying => Some(5),
            Self::Completed => Some(6),
            Self::Failed | Self::Aborted | Self::Errored => None,
        }
    }

    /// Parse from string, returning None for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(TargetPhase::Completed.is_terminal());
        assert!(TargetPhase::Failed.is_terminal());
        assert!(TargetPhase::Aborted.is_terminal());
        assert!(TargetPhase::Errored.is_terminal());
        assert!(!TargetPhase::Pending.is_terminal());
        assert!(!TargetPhase::Destroying.is_terminal());
    }

    #[test]
    fn test_resource_holding_phases() {
        assert!(!TargetPhase::Pending.may_hold_resource());
        assert!(TargetPhase::Starting.may_hold_resource());
        assert!(TargetPhase::Probing.may_hold_resource());
        assert!(TargetPhase::Destroying.may_hold_resource());
        assert!(!TargetPhase::Completed.may_hold_resource());
        assert!(!TargetPhase::Aborted.may_hold_resource());
    }

    #[test]
    fn test_ordinal_is_monotonic_along_the_happy_path() {
        let path = [
            TargetPhase::Pending,
            TargetPhase::Starting,
            TargetPhase::Started,
            TargetPhase::Probing,
            TargetPhase::Probed,
            TargetPhase::Destroying,
            TargetPhase::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].ordinal() < pair[1].ordinal());
        }
        assert_eq!(TargetPhase::Failed.ordinal(), None);
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(TargetPhase::Probing.to_string(), "Probing");
        assert_eq!(TargetPhase::parse("aborted"), Some(TargetPhase::Aborted));
        assert_eq!(TargetPhase::parse("bogus"), None);
        assert_eq!(TargetPhase::default(), TargetPhase::Pending);
    }
}
