//! Serialized, timestamped per-target log files
//!
//! Every append takes one global lock, writes exactly one complete line to
//! the target's file and echoes it to the console before releasing the lock,
//! so concurrent controllers and output readers never split a line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::{info, warn};
use vmprobe_common::log_timestamp;

/// Shared log sink, cheap to clone
#[derive(Debug, Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    logs_dir: PathBuf,
    echo: bool,
    write_lock: Mutex<()>,
}

impl LogSink {
    /// Create a sink writing under `logs_dir` (created if missing)
    pub fn new(logs_dir: impl Into<PathBuf>, echo: bool) -> Result<Self> {
        let logs_dir = logs_dir.into();
        fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;
        Ok(Self {
            inner: Arc::new(SinkInner {
                logs_dir,
                echo,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Directory holding the log files
    pub fn logs_dir(&self) -> &Path {
        &self.inner.logs_dir
    }

    /// Log file of the named target
    pub fn target_log(&self, target: &str) -> PathBuf {
        self.inner.logs_dir.join(format!("{target}.log"))
    }

    /// Append one timestamped line to `logfile` and echo it to the console.
    ///
    /// Embedded line breaks are flattened so a call always yields one line.
    /// Write failures are reported through tracing and otherwise swallowed;
    /// logging must never take a controller down.
    pub fn append(&self, logfile: &Path, message: &str) {
        let message = flatten(message);
        let _guard = self
            .inner
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Stamp under the lock so file order and timestamps agree
        let now = log_timestamp();
        let line = format!("[{now}] {message}\n");

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!(logfile = %logfile.display(), error = %e, "Failed to write log line");
        }

        if self.inner.echo {
            let name = logfile
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default();
            info!(target: "vmprobe::sink", "[{name}] [{now}] {message}");
        }
    }

    /// Append to the named target's log file
    pub fn append_target(&self, target: &str, message: &str) {
        self.append(&self.target_log(target), message);
    }
}

fn flatten(message: &str) -> std::borrow::Cow<'_, str> {
    if message.contains(['\n', '\r']) {
        message
            .split(['\n', '\r'])
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .into()
    } else {
        message.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_append_writes_timestamped_line() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new(dir.path().join("logs"), false).unwrap();

        sink.append_target("alpha", "hello");

        let lines = read_lines(&sink.target_log("alpha"));
        assert_eq!(lines.len(), 1);
        // "[YYYY-MM-DD HH:MM:SS] hello"
        assert!(lines[0].starts_with('['));
        assert_eq!(&lines[0][20..], "] hello");
    }

    #[test]
    fn test_append_preserves_call_order() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new(dir.path(), false).unwrap();
        for i in 0..50 {
            sink.append_target("beta", &format!("line {i}"));
        }
        let lines = read_lines(&sink.target_log("beta"));
        assert_eq!(lines.len(), 50);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.ends_with(&format!("] line {i}")));
        }
    }

    #[test]
    fn test_multiline_message_becomes_one_line() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new(dir.path(), false).unwrap();
        sink.append_target("gamma", "first\r\nsecond\nthird");
        let lines = read_lines(&sink.target_log("gamma"));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("] first second third"));
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new(dir.path(), false).unwrap();
        let payload = "x".repeat(4096);

        let handles: Vec<_> = ["alpha", "beta"]
            .into_iter()
            .map(|target| {
                let sink = sink.clone();
                let payload = payload.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        sink.append_target(target, &format!("{target} {i} {payload}"));
                        // Cross-target writes into a shared file as well
                        sink.append_target("shared", &format!("{target} {i} {payload}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for target in ["alpha", "beta"] {
            let lines = read_lines(&sink.target_log(target));
            assert_eq!(lines.len(), 200);
            for (i, line) in lines.iter().enumerate() {
                assert!(line.ends_with(&format!("] {target} {i} {payload}")));
            }
        }

        let shared = read_lines(&sink.target_log("shared"));
        assert_eq!(shared.len(), 400);
        for line in shared {
            assert!(line.ends_with(&payload));
            assert!(line.contains("] alpha ") || line.contains("] beta "));
        }
    }

    #[test]
    fn test_unwritable_logfile_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::new(dir.path(), false).unwrap();
        sink.append(&dir.path().join("missing/dir/target.log"), "dropped");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn every_append_yields_exactly_one_line(messages in prop::collection::vec(".*", 1..30)) {
                let dir = TempDir::new().unwrap();
                let sink = LogSink::new(dir.path(), false).unwrap();
                for message in &messages {
                    sink.append_target("prop", message);
                }
                let content = fs::read_to_string(sink.target_log("prop")).unwrap();
                prop_assert_eq!(content.matches('\n').count(), messages.len());
                prop_assert!(content.lines().all(|line| line.starts_with('[')));
            }
        }
    }
}
