//! Solver problems and results

use crate::proof::{NodeId, Sequent};
use crate::settings::SolverType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Tri-state outcome of a solver run
///
/// Failing to prove is distinct from disproving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    /// The sequent is valid (the negated query is unsat)
    Valid,
    /// The sequent has a counterexample (the negated query is sat)
    Invalid,
    /// No conclusive answer: timeout, crash, unsupported input, cancellation
    Unknown,
}

impl ResultStatus {
    /// Whether this is a conclusive answer
    pub fn is_definitive(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Invalid => write!(f, "invalid"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity of one launched batch of problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// One goal's content handed to a solver batch
///
/// The sequent is fixed at creation; the result is filled in by the batch
/// the problem was launched in, and by nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverProblem {
    node: NodeId,
    sequent: Sequent,
    batch: BatchId,
    result: Option<ResultStatus>,
}

impl SolverProblem {
    pub fn new(node: NodeId, sequent: Sequent, batch: BatchId) -> Self {
        Self {
            node,
            sequent,
            batch,
            result: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn sequent(&self) -> &Sequent {
        &self.sequent
    }

    pub fn batch(&self) -> BatchId {
        self.batch
    }

    /// Final result, `None` while the batch is running
    pub fn result(&self) -> Option<ResultStatus> {
        self.result
    }

    /// Record the result from `batch`; results from other batches are ignored
    pub(crate) fn resolve(&mut self, batch: BatchId, status: ResultStatus) -> bool {
        if batch != self.batch || self.result.is_some() {
            return false;
        }
        self.result = Some(status);
        true
    }
}

/// Result a launcher reports for one problem of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemOutcome {
    /// Node the problem was created for
    pub node: NodeId,
    /// Final answer
    pub status: ResultStatus,
    /// Solver that produced a definitive answer, if any
    pub solver: Option<SolverType>,
    /// Wall-clock time spent on the problem
    pub duration: Duration,
    /// Why the answer is `Unknown`, when known
    pub reason: Option<String>,
}

impl ProblemOutcome {
    /// Definitive answer from a solver
    pub fn solved(node: NodeId, status: ResultStatus, solver: SolverType, duration: Duration) -> Self {
        Self {
            node,
            status,
            solver: Some(solver),
            duration,
            reason: None,
        }
    }

    /// Inconclusive answer with a reason
    pub fn unknown(node: NodeId, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            node,
            status: ResultStatus::Unknown,
            solver: None,
            duration,
            reason: Some(reason.into()),
        }
    }
}
