//! Force-destroy of target VMs
//!
//! Used by every lifecycle controller for its own teardown, by the abort
//! sweep once the grace period runs out, and by the `cleanup` subcommand.
//! Destroy commands are never cancellable: once issued they run to
//! completion or to their own timeout.

use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};
use vmprobe_common::log_timestamp;

use super::status_table::StatusTable;
use crate::config::ProvisionerConfig;
use crate::discovery::Target;
use crate::log_sink::LogSink;
use crate::runner::{run_command, CommandOutput, RunOptions};

/// Issues `<tool> destroy -f` for targets
#[derive(Debug, Clone)]
pub struct Teardown {
    provisioner: ProvisionerConfig,
    timeout: Duration,
    sink: LogSink,
}

/// Outcome of a destroy sweep over several targets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Targets whose destroy exited 0
    pub destroyed: Vec<String>,
    /// Targets whose destroy failed, timed out or could not be spawned
    pub failed: Vec<String>,
}

impl SweepSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Teardown {
    pub fn new(provisioner: ProvisionerConfig, timeout: Duration, sink: LogSink) -> Self {
        Self {
            provisioner,
            timeout,
            sink,
        }
    }

    /// Force-destroy one target, counting the attempt in `status` when given.
    ///
    /// A failing destroy is logged and returned, never escalated: destroy is
    /// idempotent and the target's verdict is already decided by then.
    pub async fn destroy(&self, target: &Target, status: Option<&StatusTable>) -> CommandOutput {
        if let Some(status) = status {
            status.record_destroy(&target.name);
        }
        let logfile = self.sink.target_log(&target.name);
        let spec = self.provisioner.destroy_command(&target.dir);
        let output = run_command(
            &spec,
            &RunOptions::with_timeout(self.timeout),
            &self.sink,
            &logfile,
        )
        .await;

        if output.success() {
            info!(target = %target.name, "VM destroyed");
        } else {
            warn!(
                target = %target.name,
                exit_code = output.exit_code,
                outcome = %output.outcome,
                "Destroy did not succeed"
            );
        }
        output
    }

    /// Destroy all `targets` concurrently and wait for every destroy to finish
    pub async fn sweep(&self, targets: &[Target], status: Option<&StatusTable>) -> SweepSummary {
        if targets.is_empty() {
            return SweepSummary::default();
        }
        info!(count = targets.len(), "Sweeping VMs with force-destroy");

        let outputs = join_all(targets.iter().map(|target| async move {
            self.sink.append_target(
                &target.name,
                &format!("Force-destroy sweep at {}", log_timestamp()),
            );
            (target.name.clone(), self.destroy(target, status).await)
        }))
        .await;

        let mut summary = SweepSummary::default();
        for (name, output) in outputs {
            if output.success() {
                summary.destroyed.push(name);
            } else {
                summary.failed.push(name);
            }
        }
        summary
    }
}
