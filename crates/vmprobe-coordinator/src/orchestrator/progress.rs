//! Live status line
//!
//! The reporter polls the status table at a fixed cadence and hands one
//! combined line per poll to a renderer: in place on a terminal, as log
//! events (only when something changed) otherwise.

use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::status_table::StatusTable;
use super::types::TargetStatus;

/// Render the combined status line for a snapshot.
///
/// Each target shows as `name: Phase[progress] (elapsed: Ns)`; targets not
/// yet picked up have no elapsed part. Entries are joined with " | ".
pub fn render_status_line(snapshot: &[(String, TargetStatus)], now: Instant) -> String {
    render(snapshot, Some(now))
}

/// Same line without elapsed times, used to detect real changes
fn fingerprint(snapshot: &[(String, TargetStatus)]) -> String {
    render(snapshot, None)
}

fn render(snapshot: &[(String, TargetStatus)], now: Option<Instant>) -> String {
    snapshot
        .iter()
        .map(|(name, status)| {
            let elapsed = now
                .and_then(|now| status.elapsed(now))
                .map(|d| format!(" (elapsed: {}s)", d.as_secs()))
                .unwrap_or_default();
            format!("{name}: {}{}{elapsed}", status.phase, status.progress)
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Output side of the status reporter
pub trait StatusRenderer: Send + Sync {
    /// Show the current line; `changed` is false when only elapsed times moved
    fn update(&mut self, line: &str, changed: bool);

    /// Show the final line
    fn finish(&mut self, line: &str);
}

/// Rewrites a single terminal line in place
#[derive(Debug, Default)]
pub struct TerminalRenderer;

impl TerminalRenderer {
    fn draw(&self, line: &str, newline: bool) {
        let width = terminal::size().map(|(w, _)| w as usize).unwrap_or(usize::MAX);
        let clipped: String = line.chars().take(width.saturating_sub(1).max(1)).collect();
        let mut stdout = std::io::stdout();
        let drawn = crossterm::execute!(
            stdout,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(if newline { line } else { clipped.as_str() })
        );
        if newline {
            let _ = writeln!(stdout);
        }
        if let Err(e) = drawn {
            debug!(error = %e, "Failed to draw status line");
        }
    }
}

impl StatusRenderer for TerminalRenderer {
    fn update(&mut self, line: &str, _changed: bool) {
        self.draw(line, false);
    }

    fn finish(&mut self, line: &str) {
        self.draw(line, true);
    }
}

/// Emits the status line as a tracing event when it changes
#[derive(Debug, Default)]
pub struct LogRenderer;

impl StatusRenderer for LogRenderer {
    fn update(&mut self, line: &str, changed: bool) {
        if changed {
            info!(target: "vmprobe::status", "{line}");
        }
    }

    fn finish(&mut self, line: &str) {
        info!(target: "vmprobe::status", "{line}");
    }
}

/// Renderer matching the current stdout
pub fn default_renderer() -> Box<dyn StatusRenderer> {
    if std::io::stdout().is_terminal() {
        Box::new(TerminalRenderer)
    } else {
        Box::new(LogRenderer)
    }
}

/// Polls the status table until every target is terminal
///
/// An abort wakes the reporter right away, but it keeps polling until the
/// orchestrator has settled every target so the final line shows where each
/// one ended up.
pub struct StatusReporter {
    status: StatusTable,
    abort: CancellationToken,
    interval: Duration,
    renderer: Box<dyn StatusRenderer>,
}

impl StatusReporter {
    pub fn new(
        status: StatusTable,
        abort: CancellationToken,
        interval: Duration,
        renderer: Box<dyn StatusRenderer>,
    ) -> Self {
        Self {
            status,
            abort,
            interval,
            renderer,
        }
    }

    pub async fn run(mut self) {
        let mut last = None;
        let mut aborted = false;
        loop {
            let snapshot = self.status.snapshot();
            let key = fingerprint(&snapshot);
            let changed = last.as_ref() != Some(&key);
            self.renderer
                .update(&render_status_line(&snapshot, Instant::now()), changed);
            last = Some(key);

            if self.status.all_terminal() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.abort.cancelled(), if !aborted => aborted = true,
            }
        }
        let snapshot = self.status.snapshot();
        self.renderer
            .finish(&render_status_line(&snapshot, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use vmprobe_common::TargetPhase;

    #[derive(Clone, Default)]
    struct Recorder {
        updates: Arc<Mutex<Vec<(String, bool)>>>,
        finals: Arc<Mutex<Vec<String>>>,
    }

    impl StatusRenderer for Recorder {
        fn update(&mut self, line: &str, changed: bool) {
            self.updates.lock().unwrap().push((line.to_string(), changed));
        }

        fn finish(&mut self, line: &str) {
            self.finals.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_render_status_line() {
        let start = Instant::now();
        let snapshot = vec![
            (
                "alpha".to_string(),
                TargetStatus {
                    phase: TargetPhase::Probing,
                    progress: " [test.py]".to_string(),
                    started_at: Some(start),
                    ..Default::default()
                },
            ),
            ("beta".to_string(), TargetStatus::default()),
        ];
        let line = render_status_line(&snapshot, start + Duration::from_secs(42));
        assert_eq!(
            line,
            "alpha: Probing [test.py] (elapsed: 42s) | beta: Pending"
        );
        assert_eq!(fingerprint(&snapshot), "alpha: Probing [test.py] | beta: Pending");
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_status_line(&[], Instant::now()), "");
    }

    #[tokio::test]
    async fn test_reporter_stops_when_all_terminal() {
        let status = StatusTable::new();
        status.register(["alpha"]);
        let recorder = Recorder::default();
        let reporter = StatusReporter::new(
            status.clone(),
            CancellationToken::new(),
            Duration::from_millis(10),
            Box::new(recorder.clone()),
        );
        let handle = tokio::spawn(reporter.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        status.set_phase("alpha", TargetPhase::Completed);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reporter should stop")
            .unwrap();

        let updates = recorder.updates.lock().unwrap();
        assert!(updates[0].1, "first update is always a change");
        assert!(updates.iter().skip(1).any(|(_, changed)| !changed));
        assert_eq!(recorder.finals.lock().unwrap().as_slice(), ["alpha: Completed"]);
    }

    #[tokio::test]
    async fn test_reporter_waits_for_settled_phases_after_abort() {
        let status = StatusTable::new();
        status.register(["alpha"]);
        status.set_phase("alpha", TargetPhase::Probing);
        let abort = CancellationToken::new();
        let recorder = Recorder::default();
        let reporter = StatusReporter::new(
            status.clone(),
            abort.clone(),
            Duration::from_millis(10),
            Box::new(recorder.clone()),
        );
        let handle = tokio::spawn(reporter.run());
        abort.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished(), "reporter must outlive the abort");
        assert!(recorder.finals.lock().unwrap().is_empty());

        status.set_phase("alpha", TargetPhase::Aborted);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reporter should stop")
            .unwrap();
        assert_eq!(recorder.finals.lock().unwrap().as_slice(), ["alpha: Aborted"]);
    }
}
