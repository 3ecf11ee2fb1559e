//! `remedy` - batch remediation orchestrator CLI.
//!
//! ## Commands
//!
//! - `run`: remediate a findings file and write a run report
//! - `verify`: run the configured checkers once
//! - `preflight`: show whether the workspace is safe to mutate
//! - `report`: re-read and verify a stored run report

mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use remedy_core::{
    abort_pair, capture_head_sha, is_git_repo, read_report, render_summary_md, workspace_relative,
    write_report, ApprovalChannel, ApproveAll, BuiltinChecker, CheckerConfig, DeferAll,
    DirtyResolution, Finding, FixedResolution, GitProbe, OperatorChannel, Orchestrator,
    RemedyConfig, RunError, RunOutcome, RunReport, VerificationRunner, WorkspaceProbe,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use prompt::{PromptApprover, PromptOperator};

const DEFAULT_CONFIG_FILE: &str = "remedy.toml";
const DEFAULT_REPORT_DIR: &str = ".remedy/runs";

#[derive(Parser)]
#[command(name = "remedy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Batch remediation orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON reports
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remediate a findings file
    Run {
        /// JSON array of findings
        #[arg(short, long)]
        findings: PathBuf,

        /// Workspace path (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Config file (default: <workspace>/remedy.toml when present)
        #[arg(short, long, env = "REMEDY_CONFIG")]
        config: Option<PathBuf>,

        /// Builtin checkers to use when the config lists none (fmt,check,clippy,test)
        #[arg(long)]
        checkers: Option<String>,

        /// What to do when the workspace has uncommitted changes
        #[arg(long, value_enum, default_value_t = OnDirty::Prompt)]
        on_dirty: OnDirty,

        /// How NeedsApproval items are decided
        #[arg(long, value_enum, default_value_t = ApprovalMode::Prompt)]
        approval: ApprovalMode,

        /// Concurrent fix workers
        #[arg(long)]
        max_workers: Option<usize>,

        /// Where run reports are written, relative to the current directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Run the configured checkers once and print their verdicts
    Verify {
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        #[arg(short, long, env = "REMEDY_CONFIG")]
        config: Option<PathBuf>,

        #[arg(long)]
        checkers: Option<String>,
    },

    /// Show whether the workspace is safe to mutate
    Preflight {
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Report directory whose files do not count as workspace changes
        #[arg(long, default_value = DEFAULT_REPORT_DIR)]
        report_dir: PathBuf,
    },

    /// Re-read a stored run report and verify its digest
    Report {
        /// Run ID
        run: String,

        /// Report directory, relative to the current directory
        #[arg(long, default_value = DEFAULT_REPORT_DIR)]
        report_dir: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnDirty {
    Prompt,
    Abort,
    Continue,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ApprovalMode {
    Prompt,
    Defer,
    ApproveAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    remedy_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            findings,
            workspace,
            config,
            checkers,
            on_dirty,
            approval,
            max_workers,
            report_dir,
        } => {
            let mut config = load_config(&workspace, config.as_deref(), checkers.as_deref())?;
            if let Some(n) = max_workers {
                config.run.max_workers = n;
            }
            if let Some(dir) = report_dir {
                config.run.report_dir = dir;
            }
            cmd_run(&findings, &workspace, config, on_dirty, approval, cli.json).await
        }
        Commands::Verify {
            workspace,
            config,
            checkers,
        } => {
            let config = load_config(&workspace, config.as_deref(), checkers.as_deref())?;
            cmd_verify(&workspace, &config, cli.json).await
        }
        Commands::Preflight {
            workspace,
            report_dir,
        } => cmd_preflight(&workspace, &report_dir, cli.json).await,
        Commands::Report { run, report_dir } => cmd_report(&run, &report_dir, cli.json),
    }
}

/// Resolve the config file, then fill in builtin checkers if it lists none.
fn load_config(workspace: &Path, path: Option<&Path>, checkers: Option<&str>) -> Result<RemedyConfig> {
    let default_path = workspace.join(DEFAULT_CONFIG_FILE);
    let mut config = match path {
        Some(path) => RemedyConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None if default_path.exists() => RemedyConfig::load(&default_path)
            .with_context(|| format!("Failed to load config {:?}", default_path))?,
        None => RemedyConfig::default(),
    };

    if config.checkers.is_empty() {
        config.checkers = builtin_checkers(checkers.unwrap_or("fmt,check"))?;
    } else if checkers.is_some() {
        warn!("--checkers ignored: the config file defines its own checkers");
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn builtin_checkers(list: &str) -> Result<Vec<CheckerConfig>> {
    list.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .map(|name| {
            BuiltinChecker::from_short_name(&name)
                .map(CheckerConfig::from_builtin)
                .with_context(|| format!("Unknown checker: {name}"))
        })
        .collect()
}

/// Report directories resolve against the current directory for `run`,
/// `preflight` and `report` alike.
fn resolve_report_dir(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(dir))
}

/// Workspace-relative location of the report directory, when it lives inside
/// the workspace (but is not the workspace itself).
fn report_dir_in_workspace(workspace: &Path, report_dir: &Path) -> Option<PathBuf> {
    workspace_relative(workspace, report_dir).filter(|inside| inside != Path::new("."))
}

/// Git probe that does not count our own report files as uncommitted work.
fn workspace_probe(workspace: &Path, report_dir: &Path) -> GitProbe {
    match report_dir_in_workspace(workspace, report_dir) {
        Some(inside) => GitProbe::new().ignoring(inside),
        None => GitProbe::new(),
    }
}

fn load_findings(path: &Path) -> Result<Vec<Finding>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read findings {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse findings {:?}", path))
}

async fn cmd_run(
    findings_path: &Path,
    workspace: &Path,
    config: RemedyConfig,
    on_dirty: OnDirty,
    approval: ApprovalMode,
    json: bool,
) -> Result<()> {
    let findings = load_findings(findings_path)?;
    let report_dir = resolve_report_dir(&config.run.report_dir)?;
    let probe = workspace_probe(workspace, &report_dir);

    let operator: Arc<dyn OperatorChannel> = match on_dirty {
        OnDirty::Prompt => Arc::new(PromptOperator),
        OnDirty::Abort => Arc::new(FixedResolution(DirtyResolution::Abort)),
        OnDirty::Continue => Arc::new(FixedResolution(DirtyResolution::Continue)),
    };
    let approver: Arc<dyn ApprovalChannel> = match approval {
        ApprovalMode::Prompt => Arc::new(PromptApprover),
        ApprovalMode::Defer => Arc::new(DeferAll),
        ApprovalMode::ApproveAll => Arc::new(ApproveAll),
    };

    let (abort, signal) = abort_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current batch");
            abort.abort();
        }
    });

    let orchestrator = Orchestrator::builder(workspace)
        .config(config)
        .probe(Arc::new(probe))
        .operator(operator)
        .approval_channel(approver)
        .abort_signal(signal)
        .build()
        .context("Failed to set up orchestrator")?;

    info!(findings = findings.len(), workspace = ?workspace, "starting remediation run");
    match orchestrator.run(findings).await {
        Ok(report) => {
            let run_dir = write_report(&report, &report_dir).context("Failed to write run report")?;
            print_report(&report, json)?;
            eprintln!("Report: {}", run_dir.display());
            if report.outcome == RunOutcome::Aborted {
                anyhow::bail!("Run {} was interrupted", report.run_id);
            }
            Ok(())
        }
        Err(RunError::Rejected(e)) => Err(e).context("Run refused before any edit"),
        Err(RunError::Internal { source, partial }) => {
            let run_dir = write_report(&partial, &report_dir)
                .context("Failed to write partial run report")?;
            print_report(&partial, json)?;
            eprintln!("Partial report: {}", run_dir.display());
            Err(source).context("Internal error; run aborted")
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("serialize run report")?
        );
    } else {
        print!("{}", render_summary_md(report));
    }
    Ok(())
}

async fn cmd_verify(workspace: &Path, config: &RemedyConfig, json: bool) -> Result<()> {
    let runner = VerificationRunner::from_configs(&config.checkers);
    let snapshot = runner
        .run(workspace)
        .await
        .context("Verification could not run")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot.verdicts()).context("serialize verdicts")?
        );
    } else {
        for result in snapshot.results() {
            let status = if result.passed() { "✓" } else { "✗" };
            println!(
                "  {} {} ({}ms) {}",
                status,
                result.checker_name(),
                result.duration_ms(),
                result.verdict()
            );
        }
    }

    let failed = snapshot.failed().count();
    if failed > 0 {
        anyhow::bail!("{failed} checker(s) failed");
    }
    Ok(())
}

async fn cmd_preflight(workspace: &Path, report_dir: &Path, json: bool) -> Result<()> {
    let report_dir = resolve_report_dir(report_dir)?;
    let report = workspace_probe(workspace, &report_dir)
        .inspect(workspace)
        .await
        .context("Failed to inspect workspace")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize preflight report")?
        );
    } else {
        let status = if report.clean { "✓ clean" } else { "✗ dirty" };
        println!("{status}: {}", report.reason);
        for path in &report.dirty_paths {
            println!("  {path}");
        }
        if is_git_repo(workspace).await {
            if let Ok(sha) = capture_head_sha(workspace) {
                println!("HEAD: {sha}");
            }
        }
    }
    Ok(())
}

fn cmd_report(run: &str, report_dir: &Path, json: bool) -> Result<()> {
    let report_dir = resolve_report_dir(report_dir)?;
    let report = read_report(&report_dir, run)
        .with_context(|| format!("Failed to load report {run} from {:?}", report_dir))?;
    print_report(&report, json)
}
