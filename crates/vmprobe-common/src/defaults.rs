//! Default configuration values shared between the coordinator and fixtures
//!
//! These constants keep the CLI defaults, config defaults and test fixtures
//! in agreement.

/// Directory scanned for targets (one subdirectory per VM)
pub const DEFAULT_VM_ROOT: &str = "VM";

/// Directory receiving one append-only log file per target
pub const DEFAULT_LOGS_DIR: &str = "logs";

/// Directory receiving the HTML report of each run
pub const DEFAULT_REPORTS_DIR: &str = "reports";

/// Directory used by `populate-cache`
pub const DEFAULT_CACHE_DIR: &str = "cache";

/// Provisioning tool invoked as `<tool> up` / `<tool> destroy -f`
pub const DEFAULT_PROVISIONER: &str = "vagrant";

/// Probe file looked up inside each target directory
pub const DEFAULT_PROBE_FILE: &str = "test.py";

/// Interpreter the probe file is handed to
pub const DEFAULT_PROBE_INTERPRETER: &str = "python3";

/// Timeout for `<tool> up` in seconds
pub const DEFAULT_UP_TIMEOUT: u64 = 900;

/// Timeout for the probe in seconds
pub const DEFAULT_PROBE_TIMEOUT: u64 = 300;

/// Timeout for `<tool> destroy -f` in seconds
pub const DEFAULT_DESTROY_TIMEOUT: u64 = 900;

/// How long in-flight controllers get to finish their own teardown after an
/// abort before the orchestrator sweeps their targets itself, in seconds
pub const DEFAULT_ABORT_GRACE: u64 = 120;

/// Status line refresh interval in seconds
pub const DEFAULT_POLL_INTERVAL: u64 = 2;

/// Targets driven at the same time (VMs are expensive, so one at a time)
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Title rendered at the top of the HTML report
pub const DEFAULT_REPORT_TITLE: &str = "Rocky 9 Variations Test Report";

/// Prefix of the HTML report file name
pub const REPORT_FILE_PREFIX: &str = "variation_test_report";
