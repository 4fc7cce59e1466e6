//! vmprobe-common - Shared types and utilities
//!
//! This crate provides the types shared by the coordinator and its test
//! fixtures, without any process or filesystem code to keep it lightweight.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`run_result`]: Outcome of one lifecycle step
//! - [`status`]: Lifecycle phases of a target

pub mod defaults;
pub mod run_result;
pub mod status;

// Re-export commonly used types
pub use run_result::RunResult;
pub use status::TargetPhase;

/// Format used for the timestamp prefix of every log line.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format used to stamp report file names.
pub const REPORT_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Current local time formatted for a log line prefix.
#[inline]
pub fn log_timestamp() -> String {
    chrono::Local::now().format(LOG_TIMESTAMP_FORMAT).to_string()
}
