//! Shared test utilities for integration tests
//!
//! Coordinator-level fixtures built on the fake lab from vmprobe-test-utils.

#![allow(dead_code)]

use std::time::Duration;

use vmprobe_coordinator::config::{
    PathsConfig, ProbeConfig, ProvisionerConfig, RunConfig, RuntimeFlags, TimeoutConfig,
};
use vmprobe_coordinator::discovery::{discover_targets, Target};
use vmprobe_coordinator::log_sink::LogSink;
use vmprobe_test_utils::{FakeLab, FAKE_PROBE_FILE, FAKE_PROBE_INTERPRETER};

/// Run configuration pointing at the lab, with short timeouts
pub fn lab_config(lab: &FakeLab) -> RunConfig {
    RunConfig {
        paths: PathsConfig {
            vm_root: lab.vm_root(),
            logs_dir: lab.logs_dir(),
            reports_dir: lab.reports_dir(),
            output: None,
        },
        provisioner: ProvisionerConfig::from_command_line(&lab.provisioner_command()),
        probe: ProbeConfig {
            file: FAKE_PROBE_FILE.to_string(),
            interpreter: Some(FAKE_PROBE_INTERPRETER.to_string()),
        },
        timeouts: TimeoutConfig {
            up: Duration::from_secs(20),
            probe: Duration::from_secs(20),
            destroy: Duration::from_secs(20),
            abort_grace: Duration::from_secs(20),
        },
        flags: RuntimeFlags {
            concurrency: 1,
            poll_interval: Duration::from_millis(50),
            show_status: false,
            quiet: true,
            only: Vec::new(),
            report_title: "Lab Report".to_string(),
        },
    }
}

/// Quiet log sink writing into the lab's logs directory
pub fn lab_sink(lab: &FakeLab) -> LogSink {
    LogSink::new(lab.logs_dir(), false).unwrap()
}

/// Discover every target in the lab
pub fn lab_targets(lab: &FakeLab, config: &RunConfig) -> Vec<Target> {
    discover_targets(&lab.vm_root(), &config.probe).unwrap()
}

/// Poll `condition` every 20ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// True if `line` starts with a `[YYYY-MM-DD HH:MM:SS] ` prefix
pub fn has_timestamp_prefix(line: &str) -> bool {
    let bytes = line.as_bytes();
    if bytes.len() < 22 || bytes[0] != b'[' || bytes[20] != b']' || bytes[21] != b' ' {
        return false;
    }
    bytes[1..20].iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        10 => *b == b' ',
        13 | 16 => *b == b':',
        _ => b.is_ascii_digit(),
    })
}
