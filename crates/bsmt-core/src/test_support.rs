//! Shared helpers for unit tests

use crate::launcher::{LaunchRequest, SolverLauncher};
use crate::problem::{BatchId, ProblemOutcome, ResultStatus};
use crate::proof::Sequent;
use crate::settings::SolverType;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Sequent with a single succedent formula
pub(crate) fn seq(formula: &str) -> Sequent {
    Sequent::new(vec![], vec![formula.to_string()])
}

/// Launcher answering from a fixed table, `Unknown` for anything else
///
/// A gated launcher holds every launch until [`release_all`](Self::release_all).
pub(crate) struct ScriptedLauncher {
    results: HashMap<Sequent, ResultStatus>,
    requests: Mutex<Vec<LaunchRequest>>,
    stopped: Mutex<Vec<BatchId>>,
    gate: Option<Semaphore>,
}

impl ScriptedLauncher {
    pub(crate) fn new() -> Self {
        Self {
            results: HashMap::new(),
            requests: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub(crate) fn with_result(mut self, sequent: Sequent, status: ResultStatus) -> Self {
        self.results.insert(sequent, status);
        self
    }

    /// Let every held and future launch finish
    pub(crate) fn release_all(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    pub(crate) fn launch_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn request(&self, batch: BatchId) -> Option<LaunchRequest> {
        self.requests.lock().iter().find(|r| r.batch == batch).cloned()
    }

    pub(crate) fn stopped(&self) -> Vec<BatchId> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl SolverLauncher for ScriptedLauncher {
    async fn launch(&self, request: LaunchRequest) -> Vec<ProblemOutcome> {
        self.requests.lock().push(request.clone());
        if let Some(gate) = &self.gate {
            // Closing the semaphore is the release signal
            let _ = gate.acquire().await;
        }
        request
            .problems
            .iter()
            .map(|p| match self.results.get(&p.sequent) {
                Some(status) if status.is_definitive() => {
                    ProblemOutcome::solved(p.node, *status, SolverType::Z3, Duration::ZERO)
                }
                _ => ProblemOutcome::unknown(p.node, "scripted", Duration::ZERO),
            })
            .collect()
    }

    fn stop(&self, batch: BatchId) {
        self.stopped.lock().push(batch);
    }
}
