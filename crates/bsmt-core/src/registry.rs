//! Runner registry
//!
//! Holds at most one [`BackgroundSolverRunner`] per proof, tracks which proof
//! is currently selected and implements the apply-result action that turns a
//! background answer into a closed goal.

use crate::error::ProofError;
use crate::launcher::SolverLauncher;
use crate::listener::{ListenerRegistration, ListenerSet, RunnerListener};
use crate::proof::{EventPause, NodeId, ProofHandle, ProofId};
use crate::runner::BackgroundSolverRunner;
use crate::settings::RunnerSettings;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Result of [`RunnerRegistry::apply_result`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "error")]
pub enum ApplyOutcome {
    /// The goal was closed by the SMT rule
    Applied,
    /// Preconditions did not hold; nothing changed
    NotApplicable,
    /// The proof engine rejected the change
    Failed(String),
}

struct RunnerEntry {
    runner: BackgroundSolverRunner,
    _forwarder: ListenerRegistration,
}

struct RegistryState {
    runners: HashMap<ProofId, RunnerEntry>,
    active: Option<ProofId>,
    settings: Arc<RunnerSettings>,
}

struct RegistryInner {
    launcher: Arc<dyn SolverLauncher>,
    runtime: Handle,
    state: Mutex<RegistryState>,
    observers: ListenerSet,
}

/// One background runner per proof plus the active selection
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct RunnerRegistry {
    inner: Arc<RegistryInner>,
}

impl RunnerRegistry {
    pub fn new(settings: RunnerSettings, launcher: Arc<dyn SolverLauncher>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                launcher,
                runtime,
                state: Mutex::new(RegistryState {
                    runners: HashMap::new(),
                    active: None,
                    settings: Arc::new(settings),
                }),
                observers: ListenerSet::new(),
            }),
        }
    }

    /// Settings handed to newly created runners
    pub fn settings(&self) -> Arc<RunnerSettings> {
        Arc::clone(&self.inner.state.lock().settings)
    }

    /// Make `proof` the active proof and dispatch its open goals
    ///
    /// The previously active runner is stopped when it belongs to another
    /// proof. The runner for `proof` is reused if one exists; a reused runner
    /// that was not active retries its unresolved goals.
    pub fn on_proof_selected(&self, proof: Arc<dyn ProofHandle>) -> BackgroundSolverRunner {
        let id = proof.id();
        let (previous, existing, was_active, settings) = {
            let state = self.inner.state.lock();
            let was_active = state.active == Some(id);
            let previous = state
                .active
                .filter(|active| *active != id)
                .and_then(|active| state.runners.get(&active))
                .map(|entry| entry.runner.clone());
            let existing = state.runners.get(&id).map(|entry| entry.runner.clone());
            (previous, existing, was_active, Arc::clone(&state.settings))
        };

        if let Some(previous) = previous {
            debug!(proof = %previous.proof().id(), "Stopping previously selected runner");
            previous.stop_all();
        }

        let (runner, reactivated) = match existing {
            Some(runner) => (runner, !was_active),
            None => (self.create_runner(proof, settings), false),
        };

        self.inner.state.lock().active = Some(id);
        if reactivated {
            // Goals stopped on deselection are still marked dispatched
            runner.resume();
        } else {
            runner.dispatch_open_goals();
        }
        self.inner.observers.notify();
        runner
    }

    fn create_runner(&self, proof: Arc<dyn ProofHandle>, settings: Arc<RunnerSettings>) -> BackgroundSolverRunner {
        let id = proof.id();
        let runner = BackgroundSolverRunner::new(
            proof,
            settings,
            Arc::clone(&self.inner.launcher),
            self.inner.runtime.clone(),
        );
        let forwarder = runner.add_listener(Arc::new(Forwarder {
            registry: Arc::downgrade(&self.inner),
            proof: id,
        }));

        let mut state = self.inner.state.lock();
        if let Some(entry) = state.runners.get(&id) {
            // Another selection of the same proof won the race
            let winner = entry.runner.clone();
            drop(state);
            runner.shutdown();
            return winner;
        }
        state.runners.insert(
            id,
            RunnerEntry {
                runner: runner.clone(),
                _forwarder: forwarder,
            },
        );
        info!(proof = %id, runners = state.runners.len(), "Registered background solver runner");
        runner
    }

    /// The runner of the currently selected proof
    pub fn active_runner(&self) -> Option<BackgroundSolverRunner> {
        let state = self.inner.state.lock();
        state
            .active
            .and_then(|id| state.runners.get(&id))
            .map(|entry| entry.runner.clone())
    }

    /// The runner for a proof, if one was created
    pub fn runner_for(&self, proof: ProofId) -> Option<BackgroundSolverRunner> {
        self.inner
            .state
            .lock()
            .runners
            .get(&proof)
            .map(|entry| entry.runner.clone())
    }

    /// Number of live runners
    pub fn len(&self) -> usize {
        self.inner.state.lock().runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a background result can be applied to `node` of the active proof
    pub fn can_apply(&self, node: NodeId) -> bool {
        let Some(runner) = self.active_runner() else {
            return false;
        };
        let proof = runner.proof();
        !proof.is_closed()
            && runner.is_solved(node)
            && proof.find(node)
            && proof.is_leaf(node)
            && !proof.is_node_closed(node)
    }

    /// Close `node` of the active proof with the SMT rule
    ///
    /// If the node is no longer a goal (rules were applied below it), the
    /// subtree is pruned first. Interactive event delivery is paused for the
    /// whole mutation.
    pub fn apply_result(&self, node: NodeId) -> ApplyOutcome {
        if !self.can_apply(node) {
            debug!(node = node.0, "Background result not applicable");
            return ApplyOutcome::NotApplicable;
        }
        let Some(runner) = self.active_runner() else {
            return ApplyOutcome::NotApplicable;
        };
        let proof = Arc::clone(runner.proof());

        let result = {
            let _pause = EventPause::new(proof.as_ref());
            apply_smt(proof.as_ref(), node)
        };

        match result {
            Ok(()) => {
                info!(proof = %proof.id(), node = node.0, "Applied background SMT result");
                ApplyOutcome::Applied
            }
            Err(err) => {
                warn!(proof = %proof.id(), node = node.0, error = %err, "Failed to apply background SMT result");
                ApplyOutcome::Failed(err.to_string())
            }
        }
    }

    /// Push new settings into every runner and re-dispatch the active one
    pub fn refresh_all_settings(&self, settings: RunnerSettings) {
        let settings = Arc::new(settings);
        let runners: Vec<BackgroundSolverRunner> = {
            let mut state = self.inner.state.lock();
            state.settings = Arc::clone(&settings);
            state.runners.values().map(|entry| entry.runner.clone()).collect()
        };
        info!(runners = runners.len(), settings = %settings.summary(), "Refreshing background settings");

        for runner in &runners {
            runner.refresh_settings(Arc::clone(&settings));
        }
        if let Some(active) = self.active_runner() {
            active.dispatch_open_goals();
        }
        self.inner.observers.notify();
    }

    /// Register an observer refreshed whenever any runner refreshes
    pub fn add_observer(&self, listener: Arc<dyn RunnerListener>) -> ListenerRegistration {
        self.inner.observers.add(listener)
    }

    /// Stop every runner and forget them all
    pub fn shutdown(&self) {
        let entries: Vec<RunnerEntry> = {
            let mut state = self.inner.state.lock();
            state.active = None;
            state.runners.drain().map(|(_, entry)| entry).collect()
        };
        info!(runners = entries.len(), "Shutting down background solver runners");
        for entry in &entries {
            entry.runner.shutdown();
        }
        drop(entries);
        self.inner.observers.notify();
    }
}

fn apply_smt(proof: &dyn ProofHandle, node: NodeId) -> Result<(), ProofError> {
    if !proof.is_goal(node) {
        proof.prune_to(node)?;
    }
    let goal = proof
        .goal(node)
        .ok_or(ProofError::NotAGoal(node.0))?;
    let title = proof.node_name(node);
    proof.apply_smt_rule(&goal, &title)
}

/// Relays runner refreshes to registry observers
struct Forwarder {
    registry: Weak<RegistryInner>,
    proof: ProofId,
}

impl RunnerListener for Forwarder {
    fn runner_refresh(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let removed = {
            let mut state = registry.state.lock();
            let closed = state
                .runners
                .get(&self.proof)
                .is_some_and(|entry| entry.runner.is_closed());
            if closed {
                if state.active == Some(self.proof) {
                    state.active = None;
                }
                state.runners.remove(&self.proof)
            } else {
                None
            }
        };
        if let Some(entry) = &removed {
            debug!(proof = %entry.runner.proof().id(), "Removed runner of closed proof");
        }
        registry.observers.notify();
        // Dropping the entry disposes this forwarder's own registration
        drop(removed);
    }
}
