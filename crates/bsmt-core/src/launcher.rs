//! Solver launcher abstraction
//!
//! A launcher receives one batch of problems together with the settings
//! snapshot the batch was created under, and reports one
//! [`ProblemOutcome`] per problem when the whole batch is done.
//!
//! Cancellation is cooperative: the runner drops the launch future when the
//! batch is stopped, and additionally calls [`SolverLauncher::stop`] so
//! launchers that keep state outside the future can release it.

use crate::problem::{BatchId, ProblemOutcome};
use crate::proof::{NodeId, ProofId, Sequent};
use crate::settings::RunnerSettings;
use async_trait::async_trait;
use std::sync::Arc;

/// A problem inside a launch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedProblem {
    pub node: NodeId,
    pub sequent: Sequent,
}

/// Everything a launcher needs to run one batch
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Batch identity, echoed back through the runner
    pub batch: BatchId,
    /// Proof the problems belong to
    pub proof: ProofId,
    /// Settings snapshot captured when the batch was created
    pub settings: Arc<RunnerSettings>,
    /// Problems, at most one per node
    pub problems: Vec<LaunchedProblem>,
}

/// Starts solvers for a batch of problems
///
/// Implementations must not fail as a whole: a problem that cannot be
/// handled is reported as `Unknown` and does not affect its siblings.
/// Problems missing from the returned list are treated as `Unknown`.
#[async_trait]
pub trait SolverLauncher: Send + Sync {
    /// Run every problem of the batch and report the outcomes
    async fn launch(&self, request: LaunchRequest) -> Vec<ProblemOutcome>;

    /// Best-effort stop notification for a batch; must not block
    fn stop(&self, _batch: BatchId) {}
}
