//! Background SMT solver orchestration
//!
//! This crate runs SMT solvers on the open goals of interactive proofs without
//! the user starting them explicitly. A solver that closes a goal quickly can
//! then be applied with one action instead of several interactive steps.
//!
//! # Components
//!
//! - **BackgroundSolverRunner**: owns the dispatch lifecycle for one proof,
//!   de-duplicates work per node and caches results by sequent
//! - **RunnerRegistry**: one runner per proof, active-runner switching and the
//!   apply-result action
//! - **SolverLauncher**: the seam to solver processes; [`ProcessLauncher`]
//!   runs SMT-LIB solvers as child processes
//! - **SettingsProvider**: solver availability, selection and timeout entry
//! - **StatusReport**: view models for status windows and proof-tree decoration
//!
//! # Example
//!
//! ```rust,no_run
//! use bsmt_core::{MemoryProof, ProcessLauncher, RunnerRegistry, RunnerSettings, Sequent, SolverType};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let settings = RunnerSettings::default().with_solver(SolverType::Z3);
//! let registry = RunnerRegistry::new(
//!     settings,
//!     Arc::new(ProcessLauncher::new()),
//!     tokio::runtime::Handle::current(),
//! );
//!
//! let proof = Arc::new(MemoryProof::with_goals(
//!     "example",
//!     vec![Sequent::new(vec!["(> 2 1)".into()], vec!["(> 3 1)".into()])],
//! ));
//! let runner = registry.on_proof_selected(proof.clone());
//! runner.wait_idle().await;
//!
//! for node in runner.solved_nodes() {
//!     registry.apply_result(node);
//! }
//! # }
//! ```

// Crate-level lint configuration for pedantic clippy
#![allow(clippy::must_use_candidate)] // Getters don't need must_use
#![allow(clippy::missing_errors_doc)] // Error docs are implementation details
#![allow(clippy::module_name_repetitions)] // RunnerSettings in settings, etc.
#![allow(clippy::doc_markdown)] // Missing backticks - low priority

pub mod error;
pub mod launcher;
pub mod listener;
pub mod memory;
pub mod problem;
pub mod process;
pub mod proof;
pub mod provider;
pub mod registry;
pub mod runner;
pub mod settings;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{LaunchError, ProofError, SettingsError};
pub use launcher::{LaunchRequest, LaunchedProblem, SolverLauncher};
pub use listener::{ListenerRegistration, RunnerListener};
pub use memory::MemoryProof;
pub use problem::{BatchId, ProblemOutcome, ResultStatus, SolverProblem};
pub use process::{ProcessLauncher, SmtLibTranslator, SmtTranslator, SolverCommand};
pub use proof::{
    EventPause, Goal, NodeId, ProofEvent, ProofEventSink, ProofHandle, ProofId, Sequent,
    SubscriptionId,
};
pub use provider::{SettingsProvider, SolverEntry};
pub use registry::{ApplyOutcome, RunnerRegistry};
pub use runner::{BackgroundSolverRunner, RunnerPhase, RunnerStatus};
pub use settings::{RunnerSettings, SolverTimeout, SolverType};
pub use status::{decorate, IndicatorState, NodeDecoration, StatusReport, StatusRow};
