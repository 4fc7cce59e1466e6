//! Run orchestration
//!
//! The orchestrator registers every target in a shared [`StatusTable`],
//! spawns one lifecycle controller per target (bounded by the configured
//! concurrency) and waits for all of them. When the abort flag is set it
//! logs the interruption to every target, gives controllers a grace period
//! to tear down their own VMs, then cancels whatever is left and sweeps the
//! remaining VMs with a force-destroy before returning.

pub mod cleanup;
pub mod lifecycle;
pub mod progress;
pub mod results;
pub mod signal;
pub mod status_table;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vmprobe_common::{log_timestamp, TargetPhase};

pub use cleanup::{SweepSummary, Teardown};
pub use lifecycle::LifecycleController;
pub use progress::{render_status_line, StatusRenderer, StatusReporter};
pub use results::print_results_summary;
pub use signal::{shutdown_signal, spawn_signal_watcher};
pub use status_table::StatusTable;
pub use types::{RunReport, TargetOutcome, TargetReport, TargetStatus};

use crate::config::RunConfig;
use crate::discovery::Target;
use crate::log_sink::LogSink;

/// Runs a set of targets to completion (or abort)
pub struct Orchestrator {
    config: RunConfig,
    sink: LogSink,
    controller: LifecycleController,
    teardown: Teardown,
    renderer: Option<Box<dyn StatusRenderer>>,
}

impl Orchestrator {
    pub fn new(config: RunConfig, sink: LogSink) -> Self {
        let controller = LifecycleController::from_config(&config, sink.clone());
        let teardown = Teardown::new(
            config.provisioner.clone(),
            config.timeouts.destroy,
            sink.clone(),
        );
        Self {
            config,
            sink,
            controller,
            teardown,
            renderer: None,
        }
    }

    /// Use `renderer` for the live status line instead of the stdout default
    pub fn with_renderer(mut self, renderer: Box<dyn StatusRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Run every target and gather the report.
    ///
    /// Returns once every controller has finished or, after an abort, once
    /// the grace period has passed and the leftover VMs have been swept.
    pub async fn run(&mut self, targets: Vec<Target>, abort: CancellationToken) -> RunReport {
        let started_at = Local::now();
        let status = StatusTable::new();
        status.register(targets.iter().map(|t| t.name.clone()));
        info!(
            targets = targets.len(),
            concurrency = self.config.flags.concurrency,
            "Starting run"
        );

        let reporter = self.config.flags.show_status.then(|| {
            let renderer = self.renderer.take().unwrap_or_else(progress::default_renderer);
            tokio::spawn(
                StatusReporter::new(
                    status.clone(),
                    abort.clone(),
                    self.config.flags.poll_interval,
                    renderer,
                )
                .run(),
            )
        });

        let semaphore = Arc::new(Semaphore::new(self.config.flags.concurrency));
        let mut tasks = JoinSet::new();
        for target in targets.iter().cloned() {
            let semaphore = semaphore.clone();
            let controller = self.controller.clone();
            let status = status.clone();
            let abort = abort.clone();
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                controller.execute(&target, &status, &abort).await
            });
        }

        let mut grace_deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(joined) => handle_joined(joined, &abort),
                },
                _ = abort.cancelled(), if grace_deadline.is_none() => {
                    warn!(
                        grace_secs = self.config.timeouts.abort_grace.as_secs(),
                        "Run aborted, waiting for controllers to tear down"
                    );
                    self.log_interruption(&targets);
                    let grace = self.config.timeouts.abort_grace;
                    grace_deadline = Some(deadline_after(Instant::now(), grace));
                }
                _ = tokio::time::sleep_until(grace_deadline.unwrap_or_else(Instant::now)),
                    if grace_deadline.is_some() =>
                {
                    warn!(
                        remaining = tasks.len(),
                        "Abort grace period expired, cancelling controllers"
                    );
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        let leftovers: Vec<Target> = {
            let holding = status.holding_resources();
            targets
                .iter()
                .filter(|t| holding.contains(&t.name))
                .cloned()
                .collect()
        };
        if !leftovers.is_empty() {
            let summary = self.sweep_destroy(&leftovers, &status).await;
            if !summary.is_clean() {
                error!(targets = ?summary.failed, "Some VMs could not be destroyed");
            }
        }
        for name in status.unfinished() {
            status.set_phase(&name, TargetPhase::Aborted);
            status.set_progress(&name, "");
        }

        if let Some(reporter) = reporter {
            if let Err(e) = reporter.await {
                warn!(error = %e, "Status reporter failed");
            }
        }

        let snapshot = status.snapshot();
        let targets = targets
            .iter()
            .map(|target| {
                let state = snapshot
                    .iter()
                    .find(|(name, _)| name == &target.name)
                    .map(|(_, state)| state.clone())
                    .unwrap_or_default();
                TargetReport {
                    name: target.name.clone(),
                    phase: state.phase,
                    results: state.results,
                }
            })
            .collect();

        RunReport {
            started_at,
            finished_at: Local::now(),
            aborted: abort.is_cancelled(),
            targets,
        }
    }

    /// Force-destroy `targets` and mark them aborted
    pub async fn sweep_destroy(&self, targets: &[Target], status: &StatusTable) -> SweepSummary {
        let summary = self.teardown.sweep(targets, Some(status)).await;
        for target in targets {
            status.set_phase(&target.name, TargetPhase::Aborted);
            status.set_progress(&target.name, "");
        }
        summary
    }

    fn log_interruption(&self, targets: &[Target]) {
        let now = log_timestamp();
        for target in targets {
            self.sink
                .append_target(&target.name, &format!("Testing interrupted by user at {now}"));
        }
    }
}

/// Far enough ahead to never fire during a run
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + grace`, saturating to a far-future instant instead of overflowing
fn deadline_after(now: Instant, grace: Duration) -> Instant {
    now.checked_add(grace).unwrap_or_else(|| now + FAR_FUTURE)
}

/// A controller task that died (panic or cancellation) aborts the whole run
fn handle_joined(joined: Result<TargetOutcome, JoinError>, abort: &CancellationToken) {
    match joined {
        Ok(outcome) => {
            debug!(
                phase = %outcome.phase,
                results = outcome.results.len(),
                "Controller finished"
            );
        }
        Err(e) => {
            error!(error = %e, "Lifecycle task failed, aborting run");
            abort.cancel();
        }
    }
}
