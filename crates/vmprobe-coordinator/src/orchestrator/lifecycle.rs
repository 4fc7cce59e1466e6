//! Per-target lifecycle: start, probe, teardown
//!
//! The controller owns one target for its whole life. Whatever happens after
//! the start command has been issued (failure, timeout, abort, error, panic)
//! the VM is force-destroyed before `execute` returns.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vmprobe_common::{log_timestamp, RunResult, TargetPhase};

use super::cleanup::Teardown;
use super::status_table::StatusTable;
use super::types::TargetOutcome;
use crate::config::{ProbeConfig, ProvisionerConfig, RunConfig, TimeoutConfig};
use crate::discovery::Target;
use crate::log_sink::LogSink;
use crate::runner::{run_command, ExitOutcome, RunOptions};

/// How the start/probe part of a lifecycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveOutcome {
    /// Probe step ran (whatever its verdict)
    Finished,
    /// The start command failed
    StartFailed,
    /// The abort flag stopped the lifecycle
    Aborted,
}

/// Mutable state threaded through one lifecycle
#[derive(Debug, Default)]
struct Progress {
    results: Vec<RunResult>,
    start_attempted: bool,
}

/// Drives targets through start, probe and teardown
#[derive(Debug, Clone)]
pub struct LifecycleController {
    provisioner: ProvisionerConfig,
    probe: ProbeConfig,
    timeouts: TimeoutConfig,
    sink: LogSink,
    teardown: Teardown,
}

impl LifecycleController {
    pub fn new(
        provisioner: ProvisionerConfig,
        probe: ProbeConfig,
        timeouts: TimeoutConfig,
        sink: LogSink,
    ) -> Self {
        let teardown = Teardown::new(provisioner.clone(), timeouts.destroy, sink.clone());
        Self {
            provisioner,
            probe,
            timeouts,
            sink,
            teardown,
        }
    }

    pub fn from_config(config: &RunConfig, sink: LogSink) -> Self {
        Self::new(
            config.provisioner.clone(),
            config.probe.clone(),
            config.timeouts.clone(),
            sink,
        )
    }

    /// Run the full lifecycle of `target`, publishing progress to `status`.
    ///
    /// Never fails: every problem ends up as a terminal phase plus the
    /// results recorded so far.
    pub async fn execute(
        &self,
        target: &Target,
        status: &StatusTable,
        abort: &CancellationToken,
    ) -> TargetOutcome {
        let name = target.name.as_str();
        let logfile = self.sink.target_log(name);
        self.sink
            .append(&logfile, &format!("=== Testing {name} at {} ===", log_timestamp()));
        status.mark_started(name);

        if abort.is_cancelled() {
            status.set_phase(name, TargetPhase::Aborted);
            status.set_progress(name, "");
            self.sink.append(&logfile, "Aborted before start");
            info!(target = %name, "Skipped, run already aborted");
            return TargetOutcome {
                phase: TargetPhase::Aborted,
                results: Vec::new(),
                destroy_attempted: false,
            };
        }

        let mut progress = Progress::default();
        let driven = AssertUnwindSafe(self.drive(target, status, abort, &logfile, &mut progress))
            .catch_unwind()
            .await;

        let mut phase = match driven {
            Ok(Ok(DriveOutcome::Finished)) => TargetPhase::Completed,
            Ok(Ok(DriveOutcome::StartFailed)) => TargetPhase::Failed,
            Ok(Ok(DriveOutcome::Aborted)) => {
                self.sink.append(&logfile, "Abort requested, tearing down");
                TargetPhase::Aborted
            }
            Ok(Err(e)) => {
                error!(target = %name, error = ?e, "Lifecycle failed");
                self.sink.append(&logfile, &format!("Exception: {e:#}"));
                TargetPhase::Errored
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(target = %name, panic = %message, "Lifecycle panicked");
                self.sink.append(&logfile, &format!("Exception: panic: {message}"));
                TargetPhase::Errored
            }
        };

        if progress.start_attempted {
            status.set_phase(name, TargetPhase::Destroying);
            status.set_progress(name, "");
            self.teardown.destroy(target, Some(status)).await;
        }

        if phase == TargetPhase::Completed && abort.is_cancelled() {
            phase = TargetPhase::Aborted;
        }
        status.set_phase(name, phase);
        status.set_progress(name, "");
        // The abort sweep may have settled the phase first
        let phase = status.phase(name).unwrap_or(phase);

        self.sink.append(
            &logfile,
            &format!("=== Finished {name} ({phase}) at {} ===", log_timestamp()),
        );
        info!(target = %name, %phase, "Lifecycle finished");

        TargetOutcome {
            phase,
            results: progress.results,
            destroy_attempted: progress.start_attempted,
        }
    }

    async fn drive(
        &self,
        target: &Target,
        status: &StatusTable,
        abort: &CancellationToken,
        logfile: &Path,
        progress: &mut Progress,
    ) -> Result<DriveOutcome> {
        let name = target.name.as_str();

        // Start
        status.set_phase(name, TargetPhase::Starting);
        status.set_progress(name, " [0%]");
        let up = self.provisioner.up_command(&target.dir);
        progress.start_attempted = true;
        let output = run_command(
            &up,
            &RunOptions::with_timeout(self.timeouts.up).cancellable(abort.clone()),
            &self.sink,
            logfile,
        )
        .await;
        let started = output.success();
        record(
            status,
            name,
            progress,
            RunResult::from_exit(up.display(), output.exit_code, output.stdout, output.stderr),
        );
        if !started {
            if output.outcome == ExitOutcome::Aborted {
                return Ok(DriveOutcome::Aborted);
            }
            warn!(target = %name, exit_code = output.exit_code, "Start failed");
            status.set_progress(name, " [start failed, destroying VM]");
            return Ok(DriveOutcome::StartFailed);
        }
        if !advance(status, name, abort, TargetPhase::Started, " [VM started]") {
            return Ok(DriveOutcome::Aborted);
        }

        // Probe
        let probe_label = format!(" [{}]", self.probe.file);
        if !advance(status, name, abort, TargetPhase::Probing, &probe_label) {
            return Ok(DriveOutcome::Aborted);
        }
        let present = tokio::fs::try_exists(&target.probe)
            .await
            .with_context(|| format!("Failed to check probe {}", target.probe.display()))?;
        if present {
            let spec = self.probe.command(&target.dir);
            let output = run_command(
                &spec,
                &RunOptions::with_timeout(self.timeouts.probe).cancellable(abort.clone()),
                &self.sink,
                logfile,
            )
            .await;
            let aborted = output.outcome == ExitOutcome::Aborted;
            record(
                status,
                name,
                progress,
                RunResult::from_exit(
                    self.probe.file.clone(),
                    output.exit_code,
                    output.stdout,
                    output.stderr,
                ),
            );
            if aborted {
                return Ok(DriveOutcome::Aborted);
            }
        } else {
            warn!(target = %name, probe = %target.probe.display(), "Probe disappeared");
            record(
                status,
                name,
                progress,
                RunResult::failure(
                    format!("{} not found", self.probe.file),
                    format!("No {} file", self.probe.file),
                ),
            );
        }

        if !advance(status, name, abort, TargetPhase::Probed, "") {
            return Ok(DriveOutcome::Aborted);
        }
        Ok(DriveOutcome::Finished)
    }
}

/// Transition unless the abort flag is set
fn advance(
    status: &StatusTable,
    name: &str,
    abort: &CancellationToken,
    phase: TargetPhase,
    annotation: &str,
) -> bool {
    if abort.is_cancelled() {
        return false;
    }
    status.set_phase(name, phase);
    status.set_progress(name, annotation);
    true
}

fn record(status: &StatusTable, name: &str, progress: &mut Progress, result: RunResult) {
    status.record_result(name, result.clone());
    progress.results.push(result);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
