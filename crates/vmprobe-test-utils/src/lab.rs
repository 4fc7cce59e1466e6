//! Fake provisioning lab
//!
//! The fake tool is a POSIX shell script run as `sh <script> <verb> ...`
//! from inside the target directory. For each call it:
//!
//! 1. appends the verb to `calls.log`
//! 2. sleeps for the seconds in `<verb>.sleep` if present (the file is
//!    consumed, so only the first call sleeps)
//! 3. runs `<verb>.hook` with `sh` if present
//! 4. prints `fake <verb> output`
//! 5. exits with the code in `<verb>.exit`, or 0
//!
//! Probes are `probe.sh` files run with `sh`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// Probe file name used by lab targets
pub const FAKE_PROBE_FILE: &str = "probe.sh";

/// Interpreter lab probes are run with
pub const FAKE_PROBE_INTERPRETER: &str = "sh";

const TOOL_SCRIPT: &str = r#"#!/bin/sh
verb="$1"
echo "$verb" >> calls.log
if [ -f "$verb.sleep" ]; then
    secs=$(cat "$verb.sleep")
    rm -f "$verb.sleep"
    sleep "$secs"
fi
if [ -f "$verb.hook" ]; then
    sh "$verb.hook"
fi
echo "fake $verb output"
if [ -f "$verb.exit" ]; then
    exit "$(cat "$verb.exit")"
fi
exit 0
"#;

const DEFAULT_PROBE: &str = "echo \"probe ok\"\nexit 0\n";

/// Temporary directory tree holding a VM root, logs, reports and the tool
pub struct FakeLab {
    root: TempDir,
}

impl FakeLab {
    pub fn new() -> Result<Self> {
        let root = TempDir::new().context("Failed to create lab directory")?;
        for dir in ["VM", "logs", "reports"] {
            fs::create_dir_all(root.path().join(dir))?;
        }
        fs::write(root.path().join("fake-tool.sh"), TOOL_SCRIPT)
            .context("Failed to write fake tool")?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn vm_root(&self) -> PathBuf {
        self.root.path().join("VM")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.path().join("logs")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.path().join("reports")
    }

    /// Provisioner command line that runs the fake tool
    pub fn provisioner_command(&self) -> String {
        format!("sh {}", self.root.path().join("fake-tool.sh").display())
    }

    /// Add a target whose tool calls and probe all succeed
    pub fn add_target(&self, name: &str) -> Result<FakeTarget> {
        let target = self.add_bare_dir(name)?;
        target.probe_script(DEFAULT_PROBE)?;
        Ok(target)
    }

    /// Add a directory without a probe (not a target)
    pub fn add_bare_dir(&self, name: &str) -> Result<FakeTarget> {
        let dir = self.vm_root().join(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(FakeTarget {
            name: name.to_string(),
            dir,
        })
    }

    /// Contents of a target's log file (empty if it was never written)
    pub fn log_of(&self, name: &str) -> String {
        fs::read_to_string(self.logs_dir().join(format!("{name}.log"))).unwrap_or_default()
    }
}

/// One target directory inside a [`FakeLab`]
#[derive(Debug, Clone)]
pub struct FakeTarget {
    pub name: String,
    pub dir: PathBuf,
}

impl FakeTarget {
    /// Make `<verb>` exit with `code`
    pub fn exits(&self, verb: &str, code: i32) -> Result<&Self> {
        fs::write(self.dir.join(format!("{verb}.exit")), code.to_string())?;
        Ok(self)
    }

    /// Make the next `<verb>` sleep for `secs` before answering
    pub fn sleeps(&self, verb: &str, secs: u64) -> Result<&Self> {
        fs::write(self.dir.join(format!("{verb}.sleep")), secs.to_string())?;
        Ok(self)
    }

    /// Run a shell script body from inside the target dir on each `<verb>`
    pub fn hooks(&self, verb: &str, body: &str) -> Result<&Self> {
        fs::write(self.dir.join(format!("{verb}.hook")), body)?;
        Ok(self)
    }

    /// Make `up` swap the target directory for a plain file, so nothing
    /// inside it can be reached afterwards
    pub fn up_clobbers_dir(&self) -> Result<&Self> {
        let name = self.dir.file_name().and_then(|n| n.to_str()).unwrap_or(&self.name);
        self.hooks("up", &format!("cd .. && rm -rf '{name}' && touch '{name}'\n"))
    }

    /// Replace the probe with a shell script body
    pub fn probe_script(&self, body: &str) -> Result<&Self> {
        fs::write(self.probe_path(), body)?;
        Ok(self)
    }

    /// Probe that touches `probe.started`, then blocks for `secs`
    pub fn probe_blocks(&self, secs: u64) -> Result<&Self> {
        self.probe_script(&format!("touch probe.started\necho \"probing\"\nexec sleep {secs}\n"))
    }

    /// Probe exiting with `code` after printing to both streams
    pub fn probe_exits(&self, code: i32) -> Result<&Self> {
        self.probe_script(&format!(
            "echo \"probe output\"\necho \"probe error\" >&2\nexit {code}\n"
        ))
    }

    pub fn probe_path(&self) -> PathBuf {
        self.dir.join(FAKE_PROBE_FILE)
    }

    /// True once a blocking probe has started
    pub fn probe_started(&self) -> bool {
        self.dir.join("probe.started").exists()
    }

    /// Verbs the fake tool was called with, in order
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Number of `destroy` calls seen by the fake tool
    pub fn destroy_count(&self) -> usize {
        self.calls().iter().filter(|c| *c == "destroy").count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lab_layout() {
        let lab = FakeLab::new().unwrap();
        let target = lab.add_target("alpha").unwrap();
        assert!(lab.vm_root().is_dir());
        assert!(lab.logs_dir().is_dir());
        assert!(target.probe_path().is_file());
        assert!(lab.provisioner_command().starts_with("sh "));
        assert!(target.calls().is_empty());
        assert_eq!(target.destroy_count(), 0);
    }

    #[test]
    fn test_knobs_write_files() {
        let lab = FakeLab::new().unwrap();
        let target = lab.add_target("beta").unwrap();
        target.exits("up", 3).unwrap().sleeps("destroy", 2).unwrap();
        assert_eq!(fs::read_to_string(target.dir.join("up.exit")).unwrap(), "3");
        assert_eq!(fs::read_to_string(target.dir.join("destroy.sleep")).unwrap(), "2");
    }

    #[test]
    fn test_up_clobbers_dir_hook() {
        let lab = FakeLab::new().unwrap();
        let target = lab.add_target("gamma").unwrap();
        target.up_clobbers_dir().unwrap();
        let hook = fs::read_to_string(target.dir.join("up.hook")).unwrap();
        assert_eq!(hook, "cd .. && rm -rf 'gamma' && touch 'gamma'\n");
    }
}
