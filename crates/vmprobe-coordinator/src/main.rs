//! vmprobe: bring up ephemeral VMs, probe them, always tear them down
//!
//! Each subdirectory of the VM root holding a probe file is one target. A
//! run starts every target with the provisioning tool, runs its probe,
//! destroys it, and writes an HTML report plus per-target logs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use vmprobe_common::defaults::{
    DEFAULT_ABORT_GRACE, DEFAULT_CACHE_DIR, DEFAULT_CONCURRENCY, DEFAULT_DESTROY_TIMEOUT,
    DEFAULT_LOGS_DIR, DEFAULT_POLL_INTERVAL, DEFAULT_PROBE_FILE, DEFAULT_PROBE_INTERPRETER,
    DEFAULT_PROBE_TIMEOUT, DEFAULT_PROVISIONER, DEFAULT_REPORTS_DIR, DEFAULT_REPORT_TITLE,
    DEFAULT_UP_TIMEOUT, DEFAULT_VM_ROOT,
};
use vmprobe_coordinator::cache::{self, CachePopulator, FetchOutcome};
use vmprobe_coordinator::config::{self, ProvisionerConfig};
use vmprobe_coordinator::discovery::{discover_targets, select_targets, target_names, Target};
use vmprobe_coordinator::error::DiscoveryError;
use vmprobe_coordinator::log_sink::LogSink;
use vmprobe_coordinator::orchestrator::{
    print_results_summary, spawn_signal_watcher, Orchestrator, Teardown,
};
use vmprobe_coordinator::report;

#[derive(Parser, Debug)]
#[command(name = "vmprobe")]
#[command(about = "Provision ephemeral VMs, run a probe in each, and tear them down")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Where targets live and how they are recognised
#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Directory holding one subdirectory per VM
    #[arg(long, env = "VMPROBE_VM_ROOT", default_value = DEFAULT_VM_ROOT)]
    vm_root: PathBuf,

    /// Probe file a subdirectory must contain to be a target
    #[arg(long, env = "VMPROBE_PROBE_FILE", default_value = DEFAULT_PROBE_FILE)]
    probe_file: String,

    /// Comma-separated target names to restrict to
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,
}

impl TargetArgs {
    fn discover(&self) -> Result<Vec<Target>> {
        let probe = config::ProbeConfig {
            file: self.probe_file.clone(),
            ..Default::default()
        };
        let targets = discover_targets(&self.vm_root, &probe)?;
        Ok(select_targets(targets, &self.only)?)
    }
}

/// Arguments for the run command (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    targets: TargetArgs,

    /// Directory for per-target log files
    #[arg(long, env = "VMPROBE_LOGS_DIR", default_value = DEFAULT_LOGS_DIR)]
    logs_dir: PathBuf,

    /// Directory for HTML reports
    #[arg(long, env = "VMPROBE_REPORTS_DIR", default_value = DEFAULT_REPORTS_DIR)]
    reports_dir: PathBuf,

    /// Also write the results as JSON to this file
    #[arg(short, long, env = "VMPROBE_OUTPUT")]
    output: Option<PathBuf>,

    /// Provisioning tool command line, invoked with `up` and `destroy -f`
    #[arg(long, env = "VMPROBE_PROVISIONER", default_value = DEFAULT_PROVISIONER)]
    provisioner: String,

    /// Interpreter for the probe file (empty runs the probe directly)
    #[arg(long, env = "VMPROBE_PROBE_INTERPRETER", default_value = DEFAULT_PROBE_INTERPRETER)]
    probe_interpreter: String,

    /// Timeout for bringing a VM up, in seconds
    #[arg(long, env = "VMPROBE_UP_TIMEOUT", default_value_t = DEFAULT_UP_TIMEOUT)]
    up_timeout: u64,

    /// Timeout for the probe, in seconds
    #[arg(long, env = "VMPROBE_PROBE_TIMEOUT", default_value_t = DEFAULT_PROBE_TIMEOUT)]
    probe_timeout: u64,

    /// Timeout for destroying a VM, in seconds
    #[arg(long, env = "VMPROBE_DESTROY_TIMEOUT", default_value_t = DEFAULT_DESTROY_TIMEOUT)]
    destroy_timeout: u64,

    /// Seconds in-flight targets get to tear down after an interrupt
    #[arg(long, env = "VMPROBE_ABORT_GRACE", default_value_t = DEFAULT_ABORT_GRACE)]
    abort_grace: u64,

    /// Number of VMs driven at the same time
    #[arg(short = 'j', long, env = "VMPROBE_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Status line refresh interval, in seconds
    #[arg(long, env = "VMPROBE_POLL_INTERVAL", default_value_t = DEFAULT_POLL_INTERVAL)]
    poll_interval: u64,

    /// Disable the live status line
    #[arg(long)]
    no_status: bool,

    /// Do not echo log lines to the console
    #[arg(short, long)]
    quiet: bool,

    /// Title of the HTML report
    #[arg(long, env = "VMPROBE_REPORT_TITLE", default_value = DEFAULT_REPORT_TITLE)]
    report_title: String,
}

impl From<RunArgs> for config::RunConfig {
    fn from(args: RunArgs) -> Self {
        let interpreter = Some(args.probe_interpreter.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            paths: config::PathsConfig {
                vm_root: args.targets.vm_root,
                logs_dir: args.logs_dir,
                reports_dir: args.reports_dir,
                output: args.output,
            },
            provisioner: ProvisionerConfig::from_command_line(&args.provisioner),
            probe: config::ProbeConfig {
                file: args.targets.probe_file,
                interpreter,
            },
            timeouts: config::TimeoutConfig {
                up: Duration::from_secs(args.up_timeout),
                probe: Duration::from_secs(args.probe_timeout),
                destroy: Duration::from_secs(args.destroy_timeout),
                abort_grace: Duration::from_secs(args.abort_grace),
            },
            flags: config::RuntimeFlags {
                concurrency: args.concurrency,
                poll_interval: Duration::from_secs(args.poll_interval),
                show_status: !args.no_status,
                quiet: args.quiet,
                only: args.targets.only,
                report_title: args.report_title,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start, probe and destroy every target
    Run(Box<RunArgs>),

    /// List discovered targets
    List {
        #[command(flatten)]
        targets: TargetArgs,
    },

    /// Force-destroy the VM of every target
    Cleanup {
        #[command(flatten)]
        targets: TargetArgs,

        /// Provisioning tool command line
        #[arg(long, env = "VMPROBE_PROVISIONER", default_value = DEFAULT_PROVISIONER)]
        provisioner: String,

        /// Directory for per-target log files
        #[arg(long, env = "VMPROBE_LOGS_DIR", default_value = DEFAULT_LOGS_DIR)]
        logs_dir: PathBuf,

        /// Timeout for each destroy, in seconds
        #[arg(long, env = "VMPROBE_DESTROY_TIMEOUT", default_value_t = DEFAULT_DESTROY_TIMEOUT)]
        destroy_timeout: u64,

        /// Do not echo log lines to the console
        #[arg(short, long)]
        quiet: bool,
    },

    /// Download provisioning artifacts into the local cache
    PopulateCache {
        /// Cache directory
        #[arg(long, env = "VMPROBE_CACHE_DIR", default_value = DEFAULT_CACHE_DIR)]
        cache_dir: PathBuf,

        /// JSON manifest of `{"url", "filename"}` items (defaults to the built-in list)
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&e);
            std::process::exit(1);
        }
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

async fn run() -> Result<i32> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match args.command {
        Command::Run(run_args) => handle_run(*run_args).await,
        Command::List { targets } => handle_list(&targets),
        Command::Cleanup {
            targets,
            provisioner,
            logs_dir,
            destroy_timeout,
            quiet,
        } => handle_cleanup(&targets, &provisioner, &logs_dir, destroy_timeout, quiet).await,
        Command::PopulateCache {
            cache_dir,
            manifest,
        } => handle_populate_cache(cache_dir, manifest.as_deref()).await,
    }
}

/// Handle the run command
async fn handle_run(args: RunArgs) -> Result<i32> {
    let config: config::RunConfig = args.into();
    config.validate()?;

    let targets = discover_targets(&config.paths.vm_root, &config.probe)?;
    let targets = select_targets(targets, &config.flags.only)?;
    if targets.is_empty() {
        return Err(DiscoveryError::NoTargets(config.paths.vm_root.clone()).into());
    }
    let sink = LogSink::new(&config.paths.logs_dir, !config.flags.quiet)?;

    println!("Starting VM tests...");
    info!(
        targets = ?target_names(&targets),
        concurrency = config.flags.concurrency,
        provisioner = %config.provisioner.command.join(" "),
        "Starting run"
    );

    let abort = CancellationToken::new();
    let finished = CancellationToken::new();
    // Stays installed until exit so late signals still end the process
    let _watcher = spawn_signal_watcher(abort.clone(), finished.clone());
    let mut orchestrator = Orchestrator::new(config.clone(), sink);
    let run_report = orchestrator.run(targets, abort).await;
    finished.cancel();

    if run_report.aborted {
        println!("Testing interrupted. All VMs have been cleaned up.");
    } else {
        println!("All tests completed.");
    }

    let report_path = report::write_html_report(
        &run_report,
        &config.paths.reports_dir,
        &config.flags.report_title,
    )?;
    println!("Report written to {}", absolute(&report_path).display());
    if let Some(output) = &config.paths.output {
        report::write_json(&run_report, output)?;
    }

    print_results_summary(&run_report);
    println!(
        "Detailed logs are in: {}",
        absolute(&config.paths.logs_dir).display()
    );

    Ok(run_report.exit_code())
}

/// Handle the list command
fn handle_list(args: &TargetArgs) -> Result<i32> {
    let targets = args.discover()?;
    if targets.is_empty() {
        println!("No targets found under {}", args.vm_root.display());
        return Ok(0);
    }
    for target in &targets {
        println!("{:<24} {}", target.name, target.probe.display());
    }
    println!("\nTotal: {} targets", targets.len());
    Ok(0)
}

/// Handle the cleanup command
async fn handle_cleanup(
    args: &TargetArgs,
    provisioner: &str,
    logs_dir: &Path,
    destroy_timeout: u64,
    quiet: bool,
) -> Result<i32> {
    let targets = args.discover()?;
    if targets.is_empty() {
        println!("No targets found under {}", args.vm_root.display());
        return Ok(0);
    }
    let sink = LogSink::new(logs_dir, !quiet)?;
    let teardown = Teardown::new(
        ProvisionerConfig::from_command_line(provisioner),
        Duration::from_secs(destroy_timeout),
        sink,
    );

    println!("Destroying {} VMs...", targets.len());
    let summary = teardown.sweep(&targets, None).await;
    for name in &summary.destroyed {
        println!("  destroyed  {name}");
    }
    for name in &summary.failed {
        println!("  FAILED     {name}");
    }
    Ok(if summary.is_clean() { 0 } else { 1 })
}

/// Handle the populate-cache command
async fn handle_populate_cache(cache_dir: PathBuf, manifest: Option<&Path>) -> Result<i32> {
    let items = match manifest {
        Some(path) => cache::load_manifest(path)?,
        None => cache::default_items(),
    };
    let populator = CachePopulator::new(cache_dir)?;
    println!(
        "Populating cache in: {}",
        absolute(populator.cache_dir()).display()
    );

    let outcomes = populator.populate(&items).await;
    let mut ok = true;
    for (item, outcome) in &outcomes {
        match outcome {
            FetchOutcome::UpToDate => {
                println!("[SKIP] {} is up to date in cache.", item.filename);
            }
            FetchOutcome::Downloaded(bytes) => {
                println!("[DONE] {} ({bytes} bytes)", item.filename);
            }
            FetchOutcome::Corrupt { expected, actual } => {
                ok = false;
                println!(
                    "[FAILED] {} download incomplete or corrupted \
                     (expected: {expected}, got: {actual})",
                    item.filename
                );
            }
            FetchOutcome::Failed(e) => {
                ok = false;
                println!("[ERROR] Failed to download {}: {e}", item.url);
            }
        }
    }
    println!("Cache population complete.");
    Ok(if ok { 0 } else { 1 })
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
