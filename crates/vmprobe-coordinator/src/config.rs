//! Configuration types for the coordinator

use std::path::{Path, PathBuf};
use std::time::Duration;

use vmprobe_common::defaults::{
    DEFAULT_ABORT_GRACE, DEFAULT_CONCURRENCY, DEFAULT_DESTROY_TIMEOUT, DEFAULT_LOGS_DIR,
    DEFAULT_POLL_INTERVAL, DEFAULT_PROBE_FILE, DEFAULT_PROBE_INTERPRETER, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_PROVISIONER, DEFAULT_REPORTS_DIR, DEFAULT_REPORT_TITLE, DEFAULT_UP_TIMEOUT,
    DEFAULT_VM_ROOT,
};

use crate::error::ConfigError;
use crate::runner::CommandSpec;

/// Filesystem locations used by a run
#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Directory scanned for targets
    pub vm_root: PathBuf,
    /// Directory receiving per-target log files
    pub logs_dir: PathBuf,
    /// Directory receiving the HTML report
    pub reports_dir: PathBuf,
    /// Optional JSON results file
    pub output: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            vm_root: PathBuf::from(DEFAULT_VM_ROOT),
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
            reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
            output: None,
        }
    }
}

/// The provisioning tool, invoked as `<command> up` and `<command> destroy -f`
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Program followed by any fixed leading arguments
    pub command: Vec<String>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            command: vec![DEFAULT_PROVISIONER.to_string()],
        }
    }
}

impl ProvisionerConfig {
    /// Parse a whitespace separated command line (e.g. "vagrant" or "sh ./fake-tool")
    pub fn from_command_line(line: &str) -> Self {
        Self {
            command: line.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Command that brings the VM in `dir` up
    pub fn up_command(&self, dir: &Path) -> CommandSpec {
        self.verb(dir, &["up"])
    }

    /// Command that force-destroys the VM in `dir` (safe when nothing is running)
    pub fn destroy_command(&self, dir: &Path) -> CommandSpec {
        self.verb(dir, &["destroy", "-f"])
    }

    fn verb(&self, dir: &Path, verb: &[&str]) -> CommandSpec {
        let (program, prefix) = match self.command.split_first() {
            Some((program, prefix)) => (program.clone(), prefix.to_vec()),
            None => (DEFAULT_PROVISIONER.to_string(), Vec::new()),
        };
        let mut args = prefix;
        args.extend(verb.iter().map(|s| s.to_string()));
        CommandSpec::new(program, args, dir)
    }
}

/// Where the probe lives inside a target directory and how to start it
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Probe file name relative to the target directory
    pub file: String,
    /// Interpreter the probe file is passed to; `None` executes it directly
    pub interpreter: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            file: DEFAULT_PROBE_FILE.to_string(),
            interpreter: Some(DEFAULT_PROBE_INTERPRETER.to_string()),
        }
    }
}

impl ProbeConfig {
    /// Command that runs the probe inside `dir`
    pub fn command(&self, dir: &Path) -> CommandSpec {
        match &self.interpreter {
            Some(interpreter) => {
                CommandSpec::new(interpreter.clone(), vec![self.file.clone()], dir)
            }
            None => CommandSpec::new(format!("./{}", self.file), Vec::new(), dir),
        }
    }

    /// Absolute-or-relative path of the probe inside `dir`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.file)
    }
}

/// Per-step timeouts
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub up: Duration,
    pub probe: Duration,
    pub destroy: Duration,
    /// Time in-flight controllers get to tear down after an abort
    pub abort_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            up: Duration::from_secs(DEFAULT_UP_TIMEOUT),
            probe: Duration::from_secs(DEFAULT_PROBE_TIMEOUT),
            destroy: Duration::from_secs(DEFAULT_DESTROY_TIMEOUT),
            abort_grace: Duration::from_secs(DEFAULT_ABORT_GRACE),
        }
    }
}

/// Runtime behavior flags
#[derive(Debug, Clone)]
pub struct RuntimeFlags {
    /// Targets driven at the same time
    pub concurrency: usize,
    /// Status line refresh interval
    pub poll_interval: Duration,
    /// Render the live status line
    pub show_status: bool,
    /// Don't echo log sink entries to the console
    pub quiet: bool,
    /// Restrict the run to these target names (empty = all)
    pub only: Vec<String>,
    /// Title of the HTML report
    pub report_title: String,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL),
            show_status: true,
            quiet: false,
            only: Vec::new(),
            report_title: DEFAULT_REPORT_TITLE.to_string(),
        }
    }
}

/// Configuration for a test run
///
/// Composed of focused sub-configs, each with defaults matching the CLI.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub paths: PathsConfig,
    pub provisioner: ProvisionerConfig,
    pub probe: ProbeConfig,
    pub timeouts: TimeoutConfig,
    pub flags: RuntimeFlags,
}

impl RunConfig {
    /// Validate the configuration before any VM is touched
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flags.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.flags.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        for (name, timeout) in [
            ("up", self.timeouts.up),
            ("probe", self.timeouts.probe),
            ("destroy", self.timeouts.destroy),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        if self.provisioner.command.is_empty() {
            return Err(ConfigError::EmptyProvisioner);
        }
        if self.probe.file.is_empty() {
            return Err(ConfigError::EmptyProbeFile);
        }
        if Path::new(&self.probe.file).components().count() != 1 {
            return Err(ConfigError::InvalidProbeFile(self.probe.file.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flags.concurrency, 1);
        assert_eq!(config.timeouts.up, Duration::from_secs(900));
        assert_eq!(config.timeouts.probe, Duration::from_secs(300));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RunConfig::default();
        config.flags.concurrency = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroConcurrency));

        let mut config = RunConfig::default();
        config.timeouts.probe = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout("probe")));

        let mut config = RunConfig::default();
        config.provisioner.command.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyProvisioner));

        let mut config = RunConfig::default();
        config.probe.file = "../escape.py".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbeFile(_))
        ));
    }

    #[test]
    fn test_provisioner_verbs() {
        let provisioner = ProvisionerConfig::default();
        let up = provisioner.up_command(Path::new("VM/alpha"));
        assert_eq!(up.program, "vagrant");
        assert_eq!(up.args, vec!["up"]);
        assert_eq!(up.cwd, PathBuf::from("VM/alpha"));

        let destroy = provisioner.destroy_command(Path::new("VM/alpha"));
        assert_eq!(destroy.display(), "vagrant destroy -f");
    }

    #[test]
    fn test_provisioner_with_prefix_args() {
        let provisioner = ProvisionerConfig::from_command_line("sh  /tmp/fake-tool ");
        let up = provisioner.up_command(Path::new("."));
        assert_eq!(up.program, "sh");
        assert_eq!(up.args, vec!["/tmp/fake-tool", "up"]);
    }

    #[test]
    fn test_probe_command() {
        let probe = ProbeConfig::default();
        let cmd = probe.command(Path::new("VM/beta"));
        assert_eq!(cmd.display(), "python3 test.py");

        let direct = ProbeConfig {
            file: "probe".to_string(),
            interpreter: None,
        };
        assert_eq!(direct.command(Path::new(".")).program, "./probe");
        assert_eq!(
            direct.path_in(Path::new("VM/beta")),
            PathBuf::from("VM/beta/probe")
        );
    }
}
