//! Process-backed solver launcher
//!
//! Runs SMT-LIB solvers as child processes. Every problem of a batch is tried
//! with every selected solver in parallel; the first definitive answer wins
//! and the remaining processes of that problem are killed. The number of live
//! processes per batch is bounded by `max_concurrent_processes`.

use crate::error::LaunchError;
use crate::launcher::{LaunchRequest, SolverLauncher};
use crate::problem::{ProblemOutcome, ResultStatus};
use crate::proof::{NodeId, Sequent};
use crate::settings::{SolverTimeout, SolverType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Turns a sequent into a complete SMT-LIB script
pub trait SmtTranslator: Send + Sync {
    fn translate(&self, sequent: &Sequent) -> Result<String, LaunchError>;
}

/// Plain SMT-LIB translation
///
/// The antecedent is asserted and the succedent disjunction is negated, so
/// `unsat` means the sequent is valid. Formulas are passed through verbatim
/// after a parenthesis balance check.
#[derive(Debug, Clone, Default)]
pub struct SmtLibTranslator {
    declarations: Vec<String>,
}

impl SmtLibTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands emitted before the assertions (`declare-const`, `set-logic`, ...)
    #[must_use]
    pub fn with_declarations(mut self, declarations: impl IntoIterator<Item = String>) -> Self {
        self.declarations.extend(declarations);
        self
    }
}

fn check_formula(formula: &str) -> Result<(), LaunchError> {
    if formula.trim().is_empty() {
        return Err(LaunchError::Translation("empty formula".to_string()));
    }
    let mut depth: i64 = 0;
    for c in formula.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(LaunchError::Translation(format!(
            "unbalanced parentheses in `{formula}`"
        )));
    }
    Ok(())
}

impl SmtTranslator for SmtLibTranslator {
    fn translate(&self, sequent: &Sequent) -> Result<String, LaunchError> {
        for formula in sequent.antecedent.iter().chain(&sequent.succedent) {
            check_formula(formula)?;
        }

        let mut script = String::new();
        for declaration in &self.declarations {
            script.push_str(declaration);
            script.push('\n');
        }
        for formula in &sequent.antecedent {
            script.push_str(&format!("(assert {formula})\n"));
        }
        match sequent.succedent.as_slice() {
            [] => {}
            [single] => script.push_str(&format!("(assert (not {single}))\n")),
            many => script.push_str(&format!("(assert (not (or {})))\n", many.join(" "))),
        }
        script.push_str("(check-sat)\n(exit)\n");
        Ok(script)
    }
}

/// Program and arguments used to start one solver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl SolverCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The solver's executable from PATH with its stdin arguments
    pub fn locate(solver: SolverType) -> Option<Self> {
        which::which(solver.binary())
            .ok()
            .map(|program| Self::new(program, solver.stdin_args().iter().copied()))
    }
}

/// Launcher that runs solvers as child processes
pub struct ProcessLauncher {
    translator: Arc<dyn SmtTranslator>,
    commands: HashMap<SolverType, SolverCommand>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self {
            translator: Arc::new(SmtLibTranslator::new()),
            commands: HashMap::new(),
        }
    }

    /// Use a custom translator
    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn SmtTranslator>) -> Self {
        self.translator = translator;
        self
    }

    /// Start `solver` with `command` instead of looking it up on PATH
    #[must_use]
    pub fn with_command(mut self, solver: SolverType, command: SolverCommand) -> Self {
        self.commands.insert(solver, command);
        self
    }

    fn command_for(&self, solver: SolverType) -> Option<SolverCommand> {
        self.commands
            .get(&solver)
            .cloned()
            .or_else(|| SolverCommand::locate(solver))
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SolverLauncher for ProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> Vec<ProblemOutcome> {
        let settings = &request.settings;
        let limiter = Arc::new(Semaphore::new(settings.max_concurrent_processes.max(1)));
        let solvers: Arc<[(SolverType, Option<SolverCommand>)]> = settings
            .solver_types
            .iter()
            .copied()
            .filter(|s| s.supports_background())
            .map(|s| (s, self.command_for(s)))
            .collect();
        let timeout = settings.timeout;

        debug!(
            batch = %request.batch,
            problems = request.problems.len(),
            solvers = solvers.len(),
            "Starting solver processes"
        );

        let mut tasks = JoinSet::new();
        for (index, problem) in request.problems.iter().enumerate() {
            let script = self.translator.translate(&problem.sequent);
            let node = problem.node;
            let solvers = Arc::clone(&solvers);
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                let outcome = solve_problem(node, script, solvers, limiter, timeout).await;
                (index, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(request.problems.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => outcomes.push(done),
                Err(err) => warn!(batch = %request.batch, error = %err, "Solver task failed"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Portfolio over the selected solvers for one problem
async fn solve_problem(
    node: NodeId,
    script: Result<String, LaunchError>,
    solvers: Arc<[(SolverType, Option<SolverCommand>)]>,
    limiter: Arc<Semaphore>,
    timeout: SolverTimeout,
) -> ProblemOutcome {
    let start = Instant::now();
    let script: Arc<str> = match script {
        Ok(script) => script.into(),
        Err(err) => {
            warn!(node = node.0, error = %err, "Could not translate goal");
            return ProblemOutcome::unknown(node, err.to_string(), start.elapsed());
        }
    };
    if solvers.is_empty() {
        return ProblemOutcome::unknown(node, "no solver selected", start.elapsed());
    }

    let mut runs = JoinSet::new();
    for (solver, command) in solvers.iter().cloned() {
        let script = Arc::clone(&script);
        let limiter = Arc::clone(&limiter);
        runs.spawn(async move {
            let answer = run_solver(solver, command, &script, &limiter, timeout).await;
            (solver, answer)
        });
    }

    let mut reasons = Vec::new();
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok((solver, Ok(status))) if status.is_definitive() => {
                debug!(node = node.0, %solver, %status, "Solver answered");
                // Dropping `runs` aborts the slower solvers
                return ProblemOutcome::solved(node, status, solver, start.elapsed());
            }
            Ok((solver, Ok(_))) => reasons.push(format!("{solver} returned unknown")),
            Ok((solver, Err(err))) => {
                debug!(node = node.0, %solver, error = %err, "Solver failed");
                reasons.push(err.to_string());
            }
            Err(err) => reasons.push(err.to_string()),
        }
    }
    ProblemOutcome::unknown(node, reasons.join("; "), start.elapsed())
}

async fn run_solver(
    solver: SolverType,
    command: Option<SolverCommand>,
    script: &str,
    limiter: &Semaphore,
    timeout: SolverTimeout,
) -> Result<ResultStatus, LaunchError> {
    let command = command.ok_or(LaunchError::NotInstalled(solver))?;
    let _permit = limiter.acquire().await.map_err(|_| LaunchError::LimiterClosed)?;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    debug!(%solver, program = %command.program.display(), "Running solver");
    let mut child = cmd
        .spawn()
        .map_err(|source| LaunchError::Spawn { solver, source })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let io = async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        let mut output = String::new();
        if let Some(mut stdout) = stdout {
            stdout.read_to_string(&mut output).await?;
        }
        child.wait().await?;
        Ok::<_, std::io::Error>(output)
    };

    let output = match timeout.as_duration() {
        Some(limit) => tokio::time::timeout(limit, io)
            .await
            .map_err(|_| LaunchError::Timeout(solver))?,
        None => io.await,
    }
    .map_err(|source| LaunchError::Io { solver, source })?;

    Ok(parse_answer(&output))
}

/// Map the solver's first answer line to a result
fn parse_answer(output: &str) -> ResultStatus {
    match output.lines().map(str::trim).find(|line| !line.is_empty()) {
        Some("unsat") => ResultStatus::Valid,
        Some("sat") => ResultStatus::Invalid,
        _ => ResultStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::LaunchedProblem;
    use crate::problem::BatchId;
    use crate::proof::ProofId;
    use crate::settings::RunnerSettings;

    fn sequent(antecedent: &[&str], succedent: &[&str]) -> Sequent {
        Sequent::new(
            antecedent.iter().map(|s| (*s).to_string()).collect(),
            succedent.iter().map(|s| (*s).to_string()).collect(),
        )
    }

    #[test]
    fn test_translate_negates_succedent() {
        let translator = SmtLibTranslator::new()
            .with_declarations(["(declare-const x Int)".to_string()]);
        let script = translator
            .translate(&sequent(&["(> x 0)"], &["(> x (- 1))"]))
            .unwrap();
        assert_eq!(
            script,
            "(declare-const x Int)\n(assert (> x 0))\n(assert (not (> x (- 1))))\n(check-sat)\n(exit)\n"
        );
    }

    #[test]
    fn test_translate_multiple_succedents_as_disjunction() {
        let script = SmtLibTranslator::new()
            .translate(&sequent(&[], &["p", "q"]))
            .unwrap();
        assert!(script.contains("(assert (not (or p q)))"));
    }

    #[test]
    fn test_translate_empty_succedent_checks_antecedent() {
        let script = SmtLibTranslator::new()
            .translate(&sequent(&["false"], &[]))
            .unwrap();
        assert_eq!(script, "(assert false)\n(check-sat)\n(exit)\n");
    }

    #[test]
    fn test_translate_rejects_malformed_formulas() {
        let translator = SmtLibTranslator::new();
        assert!(matches!(
            translator.translate(&sequent(&["(> x 0"], &["true"])),
            Err(LaunchError::Translation(_))
        ));
        assert!(matches!(
            translator.translate(&sequent(&[], &[")("])),
            Err(LaunchError::Translation(_))
        ));
        assert!(translator.translate(&sequent(&[], &["  "])).is_err());
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("unsat\n"), ResultStatus::Valid);
        assert_eq!(parse_answer("\n  sat\n(model)"), ResultStatus::Invalid);
        assert_eq!(parse_answer("unknown\n"), ResultStatus::Unknown);
        assert_eq!(parse_answer("(error \"line 1\")\n"), ResultStatus::Unknown);
        assert_eq!(parse_answer(""), ResultStatus::Unknown);
    }

    #[test]
    fn test_locate_uses_stdin_arguments() {
        for solver in SolverType::ALL {
            if let Some(command) = SolverCommand::locate(solver) {
                assert!(command.program.is_absolute());
                assert_eq!(command.args, solver.stdin_args());
            }
        }
    }

    fn request(settings: RunnerSettings, sequents: Vec<Sequent>) -> LaunchRequest {
        LaunchRequest {
            batch: BatchId(1),
            proof: ProofId(1),
            settings: Arc::new(settings),
            problems: sequents
                .into_iter()
                .enumerate()
                .map(|(i, sequent)| LaunchedProblem {
                    node: NodeId(i as u64 + 1),
                    sequent,
                })
                .collect(),
        }
    }

    #[cfg(unix)]
    fn shell(script: &str) -> SolverCommand {
        SolverCommand::new("/bin/sh", ["-c", script])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unsat_is_valid() {
        let launcher = ProcessLauncher::new()
            .with_command(SolverType::Z3, shell("cat > /dev/null; echo unsat"));
        let settings = RunnerSettings::default().with_solver(SolverType::Z3);

        let outcomes = launcher
            .launch(request(settings, vec![sequent(&[], &["true"])]))
            .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].node, NodeId(1));
        assert_eq!(outcomes[0].status, ResultStatus::Valid);
        assert_eq!(outcomes[0].solver, Some(SolverType::Z3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_definitive_answer_wins() {
        let launcher = ProcessLauncher::new()
            .with_command(SolverType::Z3, shell("cat > /dev/null; echo unknown"))
            .with_command(SolverType::Cvc5, shell("cat > /dev/null; echo sat"));
        let settings = RunnerSettings::default().with_solvers([SolverType::Z3, SolverType::Cvc5]);

        let outcomes = launcher
            .launch(request(settings, vec![sequent(&[], &["p"])]))
            .await;

        assert_eq!(outcomes[0].status, ResultStatus::Invalid);
        assert_eq!(outcomes[0].solver, Some(SolverType::Cvc5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_unknown() {
        let launcher = ProcessLauncher::new().with_command(SolverType::Z3, shell("sleep 5"));
        let settings = RunnerSettings::default()
            .with_solver(SolverType::Z3)
            .with_timeout(SolverTimeout::Millis(100));

        let outcomes = launcher
            .launch(request(settings, vec![sequent(&[], &["p"])]))
            .await;

        assert_eq!(outcomes[0].status, ResultStatus::Unknown);
        assert_eq!(outcomes[0].reason.as_deref(), Some("Z3 timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failures_stay_per_problem() {
        let launcher = ProcessLauncher::new()
            .with_command(SolverType::Z3, shell("cat > /dev/null; echo unsat"));
        let settings = RunnerSettings::default().with_solver(SolverType::Z3);

        let outcomes = launcher
            .launch(request(
                settings,
                vec![sequent(&[], &["(broken"]), sequent(&[], &["ok"])],
            ))
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, ResultStatus::Unknown);
        assert!(outcomes[0]
            .reason
            .as_deref()
            .unwrap()
            .starts_with("Translation failed"));
        assert_eq!(outcomes[1].status, ResultStatus::Valid);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_unknown() {
        let launcher = ProcessLauncher::new().with_command(
            SolverType::Z3,
            SolverCommand::new("/nonexistent/bsmt-solver", Vec::<String>::new()),
        );
        let settings = RunnerSettings::default().with_solver(SolverType::Z3);

        let outcomes = launcher
            .launch(request(settings, vec![sequent(&[], &["p"])]))
            .await;

        assert_eq!(outcomes[0].status, ResultStatus::Unknown);
        assert!(outcomes[0]
            .reason
            .as_deref()
            .unwrap()
            .starts_with("Failed to start Z3"));
    }
}
