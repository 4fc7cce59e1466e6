//! Interrupt handling
//!
//! The first SIGINT/SIGTERM sets the abort flag; later ones only log, so a
//! second Ctrl+C cannot cut the cleanup short. Once the run itself is over
//! there is nothing left to clean up and a signal exits right away.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::types::EXIT_ABORTED;

/// Resolve on the next Ctrl+C or (on Unix) SIGTERM
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = async move {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => result,
        _ = terminate => Ok(()),
    }
}

/// What a received signal should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First interrupt during the run; the abort flag was just set
    Abort,
    /// Abort already in progress
    Ignore,
    /// Run already finished; exit the process
    Exit,
}

/// Decide on (and apply) the reaction to one signal
pub fn on_signal(abort: &CancellationToken, finished: &CancellationToken) -> SignalAction {
    if finished.is_cancelled() {
        SignalAction::Exit
    } else if abort.is_cancelled() {
        SignalAction::Ignore
    } else {
        abort.cancel();
        SignalAction::Abort
    }
}

/// Cancel `abort` when an interrupt arrives.
///
/// Cancel `finished` once the run has settled; a signal after that point
/// exits with the aborted status instead of being swallowed.
pub fn spawn_signal_watcher(
    abort: CancellationToken,
    finished: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = shutdown_signal().await {
                error!(error = %e, "Failed to install signal handlers");
                return;
            }
            match on_signal(&abort, &finished) {
                SignalAction::Abort => {
                    eprintln!("\nInterrupt received. Cleaning up all VMs...");
                }
                SignalAction::Ignore => {
                    warn!("Interrupt received again, cleanup still in progress");
                }
                SignalAction::Exit => {
                    eprintln!("\nInterrupt received, exiting.");
                    std::process::exit(EXIT_ABORTED);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_actions() {
        let abort = CancellationToken::new();
        let finished = CancellationToken::new();

        assert_eq!(on_signal(&abort, &finished), SignalAction::Abort);
        assert!(abort.is_cancelled());
        assert_eq!(on_signal(&abort, &finished), SignalAction::Ignore);

        finished.cancel();
        assert_eq!(on_signal(&abort, &finished), SignalAction::Exit);
    }

    #[test]
    fn test_signal_after_clean_run_exits() {
        let abort = CancellationToken::new();
        let finished = CancellationToken::new();
        finished.cancel();
        assert_eq!(on_signal(&abort, &finished), SignalAction::Exit);
        assert!(!abort.is_cancelled());
    }
}
