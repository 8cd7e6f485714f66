// Crate-level lint configuration for pedantic clippy
#![allow(clippy::doc_markdown)] // Missing backticks - low priority
#![allow(clippy::too_many_lines)] // Main may be long

//! bsmt CLI
//!
//! Runs background SMT solvers headlessly over a file of goals.
//!
//! # Commands
//!
//! - `bsmt run <file>` - Solve every goal and print the results
//! - `bsmt solvers` - Show which solvers are offered and installed
//! - `bsmt init-settings <path>` - Write a settings file from the detected solvers

mod goals;

use anyhow::{bail, Context, Result};
use bsmt_core::{
    ApplyOutcome, MemoryProof, NodeId, ProcessLauncher, ProofHandle, ResultStatus,
    RunnerRegistry, RunnerSettings, SettingsProvider, SmtLibTranslator, SolverTimeout, SolverType,
    StatusReport,
};
use clap::{Parser, Subcommand, ValueEnum};
use goals::GoalFile;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bsmt")]
#[command(about = "Run SMT solvers on proof goals in the background")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve every goal of a goal file
    Run {
        /// JSON goal file
        file: PathBuf,
        /// Solver to run (repeatable); defaults to every installed solver
        #[arg(short, long = "solver", value_enum)]
        solvers: Vec<SolverArg>,
        /// Per-solver timeout in seconds, negative for unlimited
        #[arg(short, long, allow_negative_numbers = true)]
        timeout: Option<f64>,
        /// Settings file used as the starting point
        #[arg(long, env = "BSMT_SETTINGS")]
        settings: Option<PathBuf>,
        /// Upper bound on solver processes running at once
        #[arg(long)]
        max_processes: Option<usize>,
        /// Close every proven goal with the SMT rule
        #[arg(long)]
        apply: bool,
        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show offered solvers and whether they are installed
    Solvers {
        /// Also offer legacy solvers
        #[arg(long)]
        experimental: bool,
    },
    /// Write a settings file selecting every installed solver
    InitSettings {
        /// Destination file
        path: PathBuf,
        /// Timeout in seconds, negative for unlimited
        #[arg(short, long, default_value = "1.0", allow_negative_numbers = true)]
        timeout: f64,
        /// Also select legacy solvers
        #[arg(long)]
        experimental: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SolverArg {
    Z3,
    Cvc5,
    Cvc4,
    Yices2,
}

impl From<SolverArg> for SolverType {
    fn from(arg: SolverArg) -> Self {
        match arg {
            SolverArg::Z3 => SolverType::Z3,
            SolverArg::Cvc5 => SolverType::Cvc5,
            SolverArg::Cvc4 => SolverType::Cvc4,
            SolverArg::Yices2 => SolverType::Yices2,
        }
    }
}

#[derive(Debug, Serialize)]
struct GoalReport {
    node: NodeId,
    sequent: String,
    result: Option<ResultStatus>,
    applied: Option<ApplyOutcome>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    proof: String,
    settings: String,
    goals: Vec<GoalReport>,
    closed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            solvers,
            timeout,
            settings,
            max_processes,
            apply,
            json,
        } => {
            let settings = resolve_settings(settings, &solvers, timeout, max_processes)?;
            let report = run(&file, settings, apply).await?;
            print_report(&report, json)?;
        }
        Commands::Solvers { experimental } => {
            let provider = SettingsProvider::detect(experimental);
            for entry in provider.entries() {
                let state = if entry.installed { "installed" } else { "missing" };
                println!("{:<8} {}", entry.solver.name(), state);
            }
        }
        Commands::InitSettings {
            path,
            timeout,
            experimental,
        } => {
            let mut provider = SettingsProvider::detect(experimental);
            provider.set_timeout_seconds(timeout)?;
            let settings = provider.to_settings();
            settings.save(&path)?;
            println!("{}", settings.summary());
        }
    }
    Ok(())
}

fn resolve_settings(
    file: Option<PathBuf>,
    solvers: &[SolverArg],
    timeout: Option<f64>,
    max_processes: Option<usize>,
) -> Result<RunnerSettings> {
    let mut settings = match &file {
        Some(path) => RunnerSettings::load(path)?,
        None => SettingsProvider::detect(false).to_settings(),
    };
    if !solvers.is_empty() {
        settings = settings.with_solvers(solvers.iter().copied().map(SolverType::from));
    }
    if let Some(seconds) = timeout {
        settings = settings.with_timeout(SolverTimeout::from_seconds(seconds)?);
    }
    if let Some(max) = max_processes {
        settings = settings.with_max_concurrent_processes(max);
    }
    if !settings.has_solvers() {
        bail!("No solver selected and none installed; pass --solver or install z3 or cvc5");
    }
    Ok(settings)
}

async fn run(path: &Path, settings: RunnerSettings, apply: bool) -> Result<RunReport> {
    let file = GoalFile::load(path)?;
    let proof = Arc::new(MemoryProof::with_goals(file.proof_name(), file.sequents()));
    let translator = SmtLibTranslator::new().with_declarations(file.declarations.clone());
    let launcher = ProcessLauncher::new().with_translator(Arc::new(translator));
    let summary = settings.summary();

    info!(proof = %proof.name(), goals = file.goals.len(), settings = %summary, "Starting background run");
    let registry = RunnerRegistry::new(settings, Arc::new(launcher), tokio::runtime::Handle::current());
    let runner = registry.on_proof_selected(proof.clone());
    runner.wait_idle().await;

    let problems = runner.problems();
    let mut goals: Vec<GoalReport> = proof
        .open_goals()
        .into_iter()
        .map(|goal| GoalReport {
            node: goal.node,
            result: problems
                .iter()
                .rev()
                .find(|p| p.node() == goal.node)
                .and_then(|p| p.result()),
            sequent: goal.sequent.to_string(),
            applied: None,
        })
        .collect();

    if apply {
        let report = StatusReport::for_runner(&runner);
        let outcomes = report.apply_selected(&registry);
        for (node, outcome) in outcomes {
            if let Some(goal) = goals.iter_mut().find(|g| g.node == node) {
                goal.applied = Some(outcome);
            }
        }
    }
    registry.shutdown();

    Ok(RunReport {
        proof: proof.name(),
        settings: summary,
        goals,
        closed: proof.is_closed(),
    })
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("Failed to encode report")?;
        println!("{text}");
        return Ok(());
    }

    println!("{} ({})", report.proof, report.settings);
    for goal in &report.goals {
        let result = goal
            .result
            .map_or_else(|| "stopped".to_string(), |r| r.to_string());
        let applied = match &goal.applied {
            Some(ApplyOutcome::Applied) => " [closed]",
            Some(ApplyOutcome::Failed(_)) => " [apply failed]",
            _ => "",
        };
        println!("Node {:<4} {:<8} {}{}", goal.node.0, result, goal.sequent, applied);
    }
    if report.closed {
        println!("Proof closed");
    }
    Ok(())
}
