//! Typed errors for discovery and configuration validation

use std::path::PathBuf;
use thiserror::Error;

/// Target discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The VM root directory does not exist
    #[error("VM directory '{}' does not exist", .0.display())]
    RootMissing(PathBuf),

    /// The VM root exists but is not a directory
    #[error("VM root '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// A target name passed with `--only` was not discovered
    #[error("Unknown variation: {name} (available: {available})")]
    UnknownTarget { name: String, available: String },

    /// The VM root holds no directory with a probe
    #[error("No targets with a probe found under '{}'", .0.display())]
    NoTargets(PathBuf),

    /// Failed to enumerate the VM root
    #[error("Failed to read VM directory '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DiscoveryError {
    /// Create an IO error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Run configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// concurrency is zero
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    /// one of the step timeouts is zero
    #[error("{0} timeout must be greater than 0")]
    ZeroTimeout(&'static str),

    /// poll interval is zero
    #[error("poll interval must be greater than 0")]
    ZeroPollInterval,

    /// provisioner command is empty
    #[error("provisioner command cannot be empty")]
    EmptyProvisioner,

    /// probe file name is empty
    #[error("probe file cannot be empty")]
    EmptyProbeFile,

    /// probe file name escapes the target directory
    #[error("probe file must be a plain file name, got: {0}")]
    InvalidProbeFile(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            DiscoveryError::RootMissing(PathBuf::from("VM")).to_string(),
            "VM directory 'VM' does not exist"
        );
        assert_eq!(
            ConfigError::ZeroTimeout("probe").to_string(),
            "probe timeout must be greater than 0"
        );
        assert_eq!(
            DiscoveryError::UnknownTarget {
                name: "epsilon".to_string(),
                available: "alpha, beta".to_string(),
            }
            .to_string(),
            "Unknown variation: epsilon (available: alpha, beta)"
        );
    }

    #[test]
    fn test_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = DiscoveryError::io("/srv/VM", io_err);
        assert!(err.to_string().contains("/srv/VM"));
        assert!(err.to_string().contains("denied"));
    }
}
