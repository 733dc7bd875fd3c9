/*!
 * copeer CLI: plan, run, and audit a bulk file migration.
 */

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use copeer::auditor;
use copeer::config::{Config, DiskStrategy};
use copeer::copier::{CopyExecutor, DryRunExecutor, RsyncExecutor};
use copeer::core::progress::{ProgressEvent, ProgressPublisher};
use copeer::disk::{DiskManager, DiskProbe, DryRunDiskProbe, SystemDiskProbe};
use copeer::logging;
use copeer::manifest;
use copeer::model::Plan;
use copeer::planner;
use copeer::state::StateStore;
use copeer::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "copeer", version, about = "Bulk VFX/large-file migration pipeline")]
struct Cli {
    /// Path to a YAML config file; falls back to ./copeer.yaml, then ~/.copeer/copeer.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug-level logging regardless of configured log level.
    #[arg(long, global = true)]
    verbose: bool,

    /// Write JSON logs to this file instead of the compact stdout formatter.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan a migration from a manifest or directory and print the summary.
    Plan(PlanArgs),
    /// Plan, then execute the migration.
    Run(RunArgs),
    /// Post-hoc operations over existing state/mapping logs.
    Audit {
        #[command(subcommand)]
        operation: AuditCommand,
    },
}

#[derive(clap::Args)]
struct PlanArgs {
    /// Delimited manifest file; mutually exclusive with --source-dir.
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Source directory to walk instead of reading a manifest.
    #[arg(long)]
    source_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
struct RunArgs {
    #[command(flatten)]
    plan: PlanArgs,

    /// Restrict dispatch to a subset of the planned jobs.
    #[arg(long, value_enum, default_value_t = ModeArg::All)]
    mode: ModeArg,

    /// Simulate the run: synthetic disk suitability, no state writes.
    #[arg(long)]
    dry_run: bool,

    /// Override the configured worker count for the copy phase.
    #[arg(long)]
    threads: Option<usize>,

    /// Override the configured placement strategy.
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    All,
    Copy,
    Archive,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Fill,
    RoundRobin,
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Union the rows of many mapping files into a master file.
    Merge {
        #[arg(required = true)]
        mapping_files: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Find manifest entries not yet present in a state file.
    Analyze {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        state_file: PathBuf,
    },
    /// Check that every mapped destination still exists on disk.
    Verify {
        #[arg(long)]
        mapping_file: PathBuf,
        #[arg(long)]
        missing_output: Option<PathBuf>,
    },
    /// Group a mapping file by normalized directory key.
    Stats {
        #[arg(long)]
        mapping_file: PathBuf,
    },
    /// Intersect a mapping file with a plan manifest.
    Filter {
        #[arg(long)]
        plan_manifest: PathBuf,
        #[arg(long)]
        mapping_file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).context("failed to load configuration")?,
        None => Config::load_with_fallback(),
    };
    config.verbose = cli.verbose;
    config.log_file = cli.log_file.clone();

    logging::init_logging(&config).context("failed to initialize logging")?;

    let result = match cli.command {
        Command::Plan(args) => run_plan(&args, &config).map(|_| ()),
        Command::Run(args) => run_run(&args, &config),
        Command::Audit { operation } => run_audit(operation),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(copeer_err) = e.downcast_ref::<copeer::CopeerError>() {
                std::process::exit(copeer_err.exit_code());
            }
            Err(e)
        }
    }
}

fn build_plan(args: &PlanArgs, config: &Config, state: &StateStore) -> anyhow::Result<Plan> {
    match (&args.manifest, &args.source_dir) {
        (Some(m), None) => Ok(planner::plan_from_manifest(m, config, state)?),
        (None, Some(d)) => Ok(planner::plan_from_directory(d, config, state)?),
        (Some(_), Some(_)) => bail!("specify only one of --manifest or --source-dir"),
        (None, None) => bail!("one of --manifest or --source-dir is required"),
    }
}

fn run_plan(args: &PlanArgs, config: &Config) -> anyhow::Result<Plan> {
    let state = StateStore::new(
        PathBuf::from(&config.state_file),
        PathBuf::from(&config.mapping_file),
        PathBuf::from(&config.error_log_file),
        config.dry_run,
    );
    let plan = build_plan(args, config, &state)?;
    let s = &plan.summary;
    info!(
        total_lines = s.total_lines,
        ignored_dirs = s.ignored_dirs,
        malformed_count = s.malformed_count,
        found_files = s.found_files,
        copy_count = s.copy_count,
        copy_size = s.copy_size,
        archive_count = s.archive_count,
        archive_size = s.archive_size,
        resumed_skipped = s.resumed_skipped,
        "planning summary"
    );
    Ok(plan)
}

fn run_run(args: &RunArgs, config: &Config) -> anyhow::Result<()> {
    let mut config = config.clone();
    config.dry_run = config.dry_run || args.dry_run;
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(strategy) = args.strategy {
        config.disk_strategy = match strategy {
            StrategyArg::Fill => DiskStrategy::Fill,
            StrategyArg::RoundRobin => DiskStrategy::RoundRobin,
        };
    }
    config.validate().context("invalid configuration")?;

    let mapping_file = if config.dry_run {
        PathBuf::from(&config.dry_run_mapping_file)
    } else {
        PathBuf::from(&config.mapping_file)
    };
    let state = StateStore::new(
        PathBuf::from(&config.state_file),
        mapping_file,
        PathBuf::from(&config.error_log_file),
        config.dry_run,
    );

    let mut plan = build_plan(&args.plan, &config, &state)?;
    match args.mode {
        ModeArg::All => {}
        ModeArg::Copy => plan.archive_jobs.clear(),
        ModeArg::Archive => plan.copy_jobs.clear(),
    }

    let probe: Box<dyn DiskProbe> = if config.dry_run {
        Box::new(DryRunDiskProbe)
    } else {
        Box::new(SystemDiskProbe)
    };
    let disk = DiskManager::new(
        config.mount_points.clone(),
        config.threshold,
        config.disk_strategy,
        config.max_concurrent_disks,
        probe,
    );

    let executor: Box<dyn CopyExecutor> = if config.dry_run {
        Box::new(DryRunExecutor::default())
    } else {
        Box::new(RsyncExecutor::default())
    };

    let (publisher, subscriber) = ProgressPublisher::new(1024);
    let cancel = Arc::new(AtomicBool::new(false));
    install_interrupt_hook(Arc::clone(&cancel));

    let render_handle = std::thread::spawn(move || {
        for event in subscriber.iter() {
            render_event(&event);
        }
    });

    let outcome = {
        let supervisor = Supervisor::new(&config, &disk, &state, executor.as_ref(), publisher, cancel.clone());
        supervisor.run(&plan)
        // `supervisor` (and its `ProgressPublisher`) is dropped here, closing
        // the channel so the render thread's `iter()` terminates.
    };
    let _ = render_handle.join();

    info!(
        copy_succeeded = outcome.copy_succeeded,
        copy_failed = outcome.copy_failed,
        archive_succeeded = outcome.archive_succeeded,
        archive_failed = outcome.archive_failed,
        "run complete"
    );

    if cancel.load(Ordering::SeqCst) {
        std::process::exit(130);
    }

    Ok(())
}

/// Minimal line-oriented reference consumer of the progress-event stream;
/// not a dashboard.
fn render_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::JobStarted { job_id, worker_id, .. } => {
            println!("[{worker_id}] start {}", job_id.as_str());
        }
        ProgressEvent::JobProgress { job_id, percent, .. } => {
            println!("{} {percent}%", job_id.as_str());
        }
        ProgressEvent::JobSucceeded { job_id, .. } => {
            println!("{} done", job_id.as_str());
        }
        ProgressEvent::JobFailed { job_id, error, .. } => {
            println!("{} failed: {error}", job_id.as_str());
        }
        ProgressEvent::CopyPhaseComplete { succeeded, failed, .. } => {
            println!("copy phase complete: {succeeded} ok, {failed} failed");
        }
        ProgressEvent::ArchivePhaseComplete { succeeded, failed, .. } => {
            println!("archive phase complete: {succeeded} ok, {failed} failed");
        }
        ProgressEvent::CancellationRequested { .. } => {
            println!("cancellation requested, draining in-flight jobs");
        }
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Installs a `SIGINT` handler and a background thread that forwards it into
/// `cancel`, so the supervisor's own polling loop sees the request and drains
/// in-flight jobs instead of the process dying mid-copy.
fn install_interrupt_hook(cancel: Arc<AtomicBool>) {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
    std::thread::spawn(move || loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            cancel.store(true, Ordering::SeqCst);
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    });
}

fn run_audit(operation: AuditCommand) -> anyhow::Result<()> {
    match operation {
        AuditCommand::Merge { mapping_files, output } => {
            let report = auditor::merge_mappings(&mapping_files)?;
            for (path, count) in &report.per_file_counts {
                println!("{}: {count}", path.display());
            }
            println!("total unique: {}", report.merged.len());
            let mut out = String::from("source_path,destination_path\n");
            for (src, dst) in &report.merged {
                out.push_str(&format!("{src},{dst}\n"));
            }
            std::fs::write(&output, out).context("failed to write merged mapping")?;
        }
        AuditCommand::Analyze { manifest: manifest_path, state_file } => {
            let scan = manifest::read_manifest(&manifest_path, None, ';')?;
            let rel_paths: Vec<String> = scan
                .by_directory
                .iter()
                .flat_map(|(dir, files)| files.iter().map(move |(n, _)| dir.join(n)))
                .map(|p| p.to_string_lossy().to_string())
                .collect();
            let processed = auditor::load_processed_keys(&state_file)?;
            let report = auditor::analyze(&rel_paths, &processed);
            println!("total intended: {}", report.total_intended);
            println!("missing: {}", report.missing.len());
            if let Some(root) = report.detected_source_root {
                println!("detected source_root: {root}");
            }
        }
        AuditCommand::Verify { mapping_file, missing_output } => {
            let report = auditor::verify(&mapping_file)?;
            println!("total: {}", report.total);
            println!("missing: {}", report.missing.len());
            if let Some(path) = missing_output {
                let mut out = String::from("missing_destination_path\n");
                for m in &report.missing {
                    out.push_str(m);
                    out.push('\n');
                }
                std::fs::write(path, out).context("failed to write missing-destination list")?;
            }
        }
        AuditCommand::Stats { mapping_file } => {
            let grouped = auditor::stats(&mapping_file)?;
            let mut dirs: Vec<&String> = grouped.keys().collect();
            dirs.sort();
            for dir in dirs {
                let data = &grouped[dir];
                println!("{dir}: in_source={}", data.in_source);
                let mut disks: Vec<&String> = data.destinations.keys().collect();
                disks.sort();
                for disk in disks {
                    println!("  {disk}: {}", data.destinations[disk].len());
                }
            }
        }
        AuditCommand::Filter { plan_manifest, mapping_file } => {
            let scan = manifest::read_manifest(&plan_manifest, None, ';')?;
            let keys: Vec<String> = scan
                .by_directory
                .iter()
                .flat_map(|(dir, files)| files.iter().map(move |(n, _)| dir.join(n)))
                .map(|p| p.to_string_lossy().to_string())
                .collect();
            let report = auditor::filter_plan_against_mapping(&keys, &mapping_file)?;
            println!("total in plan: {}", report.total_in_plan);
            println!("matched: {}", report.matched.len());
            println!("missing from mapping: {}", report.missing_from_mapping.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_plan_subcommand() {
        let cli = Cli::try_parse_from(["copeer", "plan", "--manifest", "m.csv"]).unwrap();
        assert!(matches!(cli.command, Command::Plan(_)));
    }

    #[test]
    fn cli_rejects_missing_subcommand() {
        assert!(Cli::try_parse_from(["copeer"]).is_err());
    }

    #[test]
    fn cli_parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "copeer", "run", "--source-dir", "/src", "--dry-run", "--mode", "copy", "--threads", "4",
        ])
        .unwrap();
        match cli.command {
            Command::Run(args) => {
                assert!(args.dry_run);
                assert_eq!(args.threads, Some(4));
                assert!(matches!(args.mode, ModeArg::Copy));
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn build_plan_rejects_both_inputs() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let state = StateStore::new(
            dir.path().join("state.csv"),
            dir.path().join("mapping.csv"),
            dir.path().join("errors.log"),
            false,
        );
        let args = PlanArgs { manifest: Some(PathBuf::from("a")), source_dir: Some(PathBuf::from("b")) };
        assert!(build_plan(&args, &config, &state).is_err());
    }

    #[test]
    fn build_plan_rejects_neither_input() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let state = StateStore::new(
            dir.path().join("state.csv"),
            dir.path().join("mapping.csv"),
            dir.path().join("errors.log"),
            false,
        );
        let args = PlanArgs { manifest: None, source_dir: None };
        assert!(build_plan(&args, &config, &state).is_err());
    }
}
