//! Per-proof background solver runner
//!
//! A [`BackgroundSolverRunner`] watches one proof. Whenever new goals appear
//! it hands them to the [`SolverLauncher`] as one batch, and it keeps track of
//! which nodes were already handed out, which batches are still running and
//! which nodes were proven valid.
//!
//! # Concurrency
//!
//! Every batch runs as a tokio task on the runtime handle the runner was
//! created with. The task races the launch against a per-batch broadcast stop
//! signal and reports back through [`BackgroundSolverRunner::on_launcher_completed`].
//! A completion for a batch that is no longer in flight is discarded.
//!
//! All bookkeeping sits under one mutex. Proof callbacks and listener
//! notifications always happen with that mutex released.

use crate::launcher::{LaunchRequest, LaunchedProblem, SolverLauncher};
use crate::listener::{ListenerRegistration, ListenerSet, RunnerListener};
use crate::problem::{BatchId, ProblemOutcome, ResultStatus, SolverProblem};
use crate::proof::{Goal, NodeId, ProofEvent, ProofEventSink, ProofHandle, Sequent, SubscriptionId};
use crate::settings::{RunnerSettings, SolverType};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

/// Externally visible lifecycle phase of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    /// Nothing in flight
    Idle,
    /// Collecting goals for a new batch
    Dispatching,
    /// At least one batch is running
    Running,
    /// Recording the outcomes of a finished batch
    Completing,
    /// Automode is running; no new batches are created
    Suspended,
    /// The proof closed or the runner was shut down
    Closed,
}

impl fmt::Display for RunnerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Running => "running",
            Self::Completing => "completing",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a runner's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerStatus {
    pub phase: RunnerPhase,
    pub suspended: bool,
    /// Batches currently running
    pub in_flight: usize,
    /// Nodes handed to the launcher since the last refresh
    pub dispatched: usize,
    /// Nodes proven valid
    pub solved: usize,
    /// Batches launched over the runner's lifetime
    pub launches: u64,
}

/// Which goals a dispatch may pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchMode {
    /// Goals whose node was never dispatched
    Fresh,
    /// Goals without a cached result that are not running right now
    Retry,
}

#[derive(Default)]
struct RunnerState {
    in_flight: HashMap<BatchId, broadcast::Sender<()>>,
    dispatched: HashSet<NodeId>,
    solved: BTreeSet<NodeId>,
    problems: Vec<SolverProblem>,
    suspended: bool,
    closed: bool,
    subscription: Option<SubscriptionId>,
    launches: u64,
}

impl RunnerState {
    fn cached_result(&self, sequent: &Sequent) -> Option<ResultStatus> {
        self.problems
            .iter()
            .filter(|p| p.sequent() == sequent)
            .filter_map(SolverProblem::result)
            .find(|r| *r != ResultStatus::Unknown)
    }

    fn is_running(&self, node: NodeId) -> bool {
        self.problems
            .iter()
            .any(|p| p.node() == node && p.result().is_none() && self.in_flight.contains_key(&p.batch()))
    }

    /// Signal every running batch and forget it
    fn take_in_flight(&mut self) -> Vec<BatchId> {
        self.in_flight
            .drain()
            .map(|(batch, stop)| {
                let _ = stop.send(());
                batch
            })
            .collect()
    }
}

/// Counts an in-progress transition for [`RunnerPhase`] reporting
struct Transition<'a>(&'a AtomicUsize);

impl<'a> Transition<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RunnerInner {
    proof: Arc<dyn ProofHandle>,
    launcher: Arc<dyn SolverLauncher>,
    runtime: Handle,
    settings: RwLock<Arc<RunnerSettings>>,
    state: Mutex<RunnerState>,
    listeners: ListenerSet,
    next_batch: AtomicU64,
    dispatching: AtomicUsize,
    completing: AtomicUsize,
    idle: Notify,
}

/// Forwards proof events to a runner without keeping it alive
struct RunnerEvents {
    runner: Weak<RunnerInner>,
}

impl ProofEventSink for RunnerEvents {
    fn proof_event(&self, event: &ProofEvent) {
        if let Some(inner) = self.runner.upgrade() {
            inner.handle_event(event);
        }
    }
}

/// Runs SMT solvers on the open goals of one proof
///
/// Cloning is cheap; clones share the same runner.
#[derive(Clone)]
pub struct BackgroundSolverRunner {
    inner: Arc<RunnerInner>,
}

impl BackgroundSolverRunner {
    /// Create a runner and subscribe it to the proof's events
    ///
    /// Nothing is dispatched until [`dispatch_open_goals`](Self::dispatch_open_goals)
    /// is called or the proof emits an event.
    pub fn new(
        proof: Arc<dyn ProofHandle>,
        settings: Arc<RunnerSettings>,
        launcher: Arc<dyn SolverLauncher>,
        runtime: Handle,
    ) -> Self {
        let inner = Arc::new(RunnerInner {
            proof,
            launcher,
            runtime,
            settings: RwLock::new(settings),
            state: Mutex::new(RunnerState::default()),
            listeners: ListenerSet::new(),
            next_batch: AtomicU64::new(1),
            dispatching: AtomicUsize::new(0),
            completing: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let sink = Arc::new(RunnerEvents {
            runner: Arc::downgrade(&inner),
        });
        let subscription = inner.proof.subscribe(sink);
        inner.state.lock().subscription = Some(subscription);

        info!(proof = %inner.proof.id(), name = %inner.proof.name(), "Created background solver runner");
        Self { inner }
    }

    /// The proof this runner watches
    pub fn proof(&self) -> &Arc<dyn ProofHandle> {
        &self.inner.proof
    }

    /// Current settings snapshot
    pub fn settings(&self) -> Arc<RunnerSettings> {
        Arc::clone(&*self.inner.settings.read())
    }

    /// Launch one batch for every open goal not dispatched before
    ///
    /// Returns the batch id when something was launched.
    pub fn dispatch_open_goals(&self) -> Option<BatchId> {
        self.inner.dispatch_open_goals()
    }

    /// Retry every open goal without a cached result that is not running
    ///
    /// Used when a proof becomes active again after [`stop_all`](Self::stop_all).
    pub fn resume(&self) -> Option<BatchId> {
        self.inner.resume()
    }

    /// New goals appeared through a rule application
    pub fn on_rule_applied(&self, new_goals: Vec<Goal>) -> Option<BatchId> {
        self.inner.on_rule_applied(new_goals)
    }

    /// Automode started; suspend dispatching
    pub fn on_auto_mode_started(&self) {
        self.inner.on_auto_mode_started();
    }

    /// Automode stopped; resume and catch up on the open goals
    pub fn on_auto_mode_stopped(&self) -> Option<BatchId> {
        self.inner.on_auto_mode_stopped()
    }

    /// The tree changed shape without a rule application
    pub fn on_tree_structure_changed(&self) -> Option<BatchId> {
        self.inner.on_tree_structure_changed()
    }

    /// The proof closed; stop everything and detach. Terminal.
    pub fn on_proof_closed(&self) {
        self.inner.close("proof closed");
    }

    /// Record the outcomes of a finished batch
    ///
    /// Completions of batches that are no longer in flight are ignored.
    pub fn on_launcher_completed(&self, batch: BatchId, outcomes: Vec<ProblemOutcome>) {
        self.inner.on_launcher_completed(batch, outcomes);
    }

    /// First conclusive result recorded for an equal sequent
    pub fn cached_result(&self, sequent: &Sequent) -> Option<ResultStatus> {
        self.inner.state.lock().cached_result(sequent)
    }

    /// Replace the settings and forget what was dispatched under the old ones
    ///
    /// Running batches are stopped. Solved nodes are kept.
    pub fn refresh_settings(&self, settings: Arc<RunnerSettings>) {
        self.inner.refresh_settings(settings);
    }

    /// Replace the solver selection and retry goals without a conclusive result
    pub fn set_solver_types(&self, solver_types: BTreeSet<SolverType>) -> Option<BatchId> {
        self.inner.set_solver_types(solver_types)
    }

    /// Signal every running batch to stop; never blocks
    pub fn stop_all(&self) {
        self.inner.stop_all();
    }

    /// Stop everything and detach from the proof. Terminal.
    pub fn shutdown(&self) {
        self.inner.close("shutdown");
    }

    /// Nodes proven valid, in node order
    pub fn solved_nodes(&self) -> Vec<NodeId> {
        self.inner.state.lock().solved.iter().copied().collect()
    }

    pub fn is_solved(&self, node: NodeId) -> bool {
        self.inner.state.lock().solved.contains(&node)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    /// Problems created under the current settings
    pub fn problems(&self) -> Vec<SolverProblem> {
        self.inner.state.lock().problems.clone()
    }

    /// Batches currently running
    pub fn in_flight(&self) -> Vec<BatchId> {
        let mut batches: Vec<BatchId> = self.inner.state.lock().in_flight.keys().copied().collect();
        batches.sort();
        batches
    }

    pub fn phase(&self) -> RunnerPhase {
        self.inner.phase()
    }

    pub fn status(&self) -> RunnerStatus {
        let phase = self.inner.phase();
        let state = self.inner.state.lock();
        RunnerStatus {
            phase,
            suspended: state.suspended,
            in_flight: state.in_flight.len(),
            dispatched: state.dispatched.len(),
            solved: state.solved.len(),
            launches: state.launches,
        }
    }

    /// Register a refresh listener
    pub fn add_listener(&self, listener: Arc<dyn RunnerListener>) -> ListenerRegistration {
        self.inner.listeners.add(listener)
    }

    /// Wait until no batch is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.state.lock().in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Whether both handles refer to the same runner
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for BackgroundSolverRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundSolverRunner")
            .field("proof", &self.inner.proof.id())
            .field("phase", &self.inner.phase())
            .finish_non_exhaustive()
    }
}

impl RunnerInner {
    fn handle_event(self: &Arc<Self>, event: &ProofEvent) {
        match event {
            ProofEvent::RuleApplied { new_goals } => {
                self.on_rule_applied(new_goals.clone());
            }
            ProofEvent::AutoModeStarted => self.on_auto_mode_started(),
            ProofEvent::AutoModeStopped => {
                self.on_auto_mode_stopped();
            }
            ProofEvent::TreeStructureChanged => {
                self.on_tree_structure_changed();
            }
            ProofEvent::ProofClosed => self.close("proof closed"),
        }
    }

    fn phase(&self) -> RunnerPhase {
        let state = self.state.lock();
        if state.closed {
            RunnerPhase::Closed
        } else if state.suspended {
            RunnerPhase::Suspended
        } else if self.completing.load(Ordering::SeqCst) > 0 {
            RunnerPhase::Completing
        } else if self.dispatching.load(Ordering::SeqCst) > 0 {
            RunnerPhase::Dispatching
        } else if state.in_flight.is_empty() {
            RunnerPhase::Idle
        } else {
            RunnerPhase::Running
        }
    }

    /// Whether new batches may be created right now
    fn accepting(&self) -> bool {
        let state = self.state.lock();
        !state.closed && !state.suspended
    }

    fn dispatch_open_goals(self: &Arc<Self>) -> Option<BatchId> {
        if !self.accepting() {
            return None;
        }
        let _transition = Transition::enter(&self.dispatching);
        let goals = self.proof.open_goals();
        self.dispatch_goals(goals, DispatchMode::Fresh)
    }

    fn resume(self: &Arc<Self>) -> Option<BatchId> {
        if !self.accepting() {
            return None;
        }
        let _transition = Transition::enter(&self.dispatching);
        let goals = self.proof.open_goals();
        self.dispatch_goals(goals, DispatchMode::Retry)
    }

    fn on_rule_applied(self: &Arc<Self>, new_goals: Vec<Goal>) -> Option<BatchId> {
        let (closed, suspended) = {
            let state = self.state.lock();
            (state.closed, state.suspended)
        };
        if closed {
            debug!(proof = %self.proof.id(), goals = new_goals.len(), "Ignoring rule application on closed runner");
            return None;
        }
        if suspended {
            debug!(proof = %self.proof.id(), goals = new_goals.len(), "Ignoring rule application while suspended");
            return None;
        }
        let _transition = Transition::enter(&self.dispatching);
        self.dispatch_goals(new_goals, DispatchMode::Fresh)
    }

    fn on_auto_mode_started(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.suspended = true;
            debug!(proof = %self.proof.id(), "Automode started, suspending dispatch");
        }
    }

    fn on_auto_mode_stopped(self: &Arc<Self>) -> Option<BatchId> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            state.suspended = false;
        }
        debug!(proof = %self.proof.id(), "Automode stopped, resuming dispatch");
        self.dispatch_open_goals()
    }

    fn on_tree_structure_changed(self: &Arc<Self>) -> Option<BatchId> {
        if self.state.lock().closed {
            return None;
        }
        self.listeners.notify();
        self.dispatch_open_goals()
    }

    /// Create and spawn one batch from `goals`
    fn dispatch_goals(self: &Arc<Self>, goals: Vec<Goal>, mode: DispatchMode) -> Option<BatchId> {
        let batch = BatchId(self.next_batch.fetch_add(1, Ordering::Relaxed));
        let (stop_tx, mut stop_rx) = broadcast::channel::<()>(1);

        let (settings, problems) = {
            let mut state = self.state.lock();
            if state.closed || state.suspended {
                return None;
            }
            let settings = Arc::clone(&*self.settings.read());
            if !settings.has_solvers() {
                debug!(proof = %self.proof.id(), "No solver selected, nothing to dispatch");
                return None;
            }

            let mut seen = HashSet::new();
            let mut picked = Vec::new();
            for goal in goals {
                if !seen.insert(goal.node) {
                    continue;
                }
                let skip = match mode {
                    DispatchMode::Fresh => state.dispatched.contains(&goal.node),
                    DispatchMode::Retry => {
                        state.is_running(goal.node) || state.cached_result(&goal.sequent).is_some()
                    }
                };
                if !skip {
                    picked.push(LaunchedProblem {
                        node: goal.node,
                        sequent: goal.sequent,
                    });
                }
            }
            if picked.is_empty() {
                return None;
            }

            for problem in &picked {
                state.dispatched.insert(problem.node);
                state
                    .problems
                    .push(SolverProblem::new(problem.node, problem.sequent.clone(), batch));
            }
            state.in_flight.insert(batch, stop_tx);
            state.launches += 1;
            (settings, picked)
        };

        info!(
            proof = %self.proof.id(),
            %batch,
            problems = problems.len(),
            solvers = %settings.summary(),
            "Launching background solvers"
        );

        let request = LaunchRequest {
            batch,
            proof: self.proof.id(),
            settings,
            problems,
        };
        let launcher = Arc::clone(&self.launcher);
        let runner = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let outcomes = tokio::select! {
                outcomes = launcher.launch(request) => outcomes,
                _ = stop_rx.recv() => {
                    debug!(%batch, "Batch stopped");
                    return;
                }
            };
            if let Some(runner) = runner.upgrade() {
                runner.on_launcher_completed(batch, outcomes);
            }
        });
        Some(batch)
    }

    fn on_launcher_completed(&self, batch: BatchId, outcomes: Vec<ProblemOutcome>) {
        let transition = Transition::enter(&self.completing);

        let still_present: HashSet<NodeId> = outcomes
            .iter()
            .filter(|o| o.status == ResultStatus::Valid)
            .map(|o| o.node)
            .filter(|node| self.proof.find(*node))
            .collect();
        let tracked: BTreeSet<NodeId> = self.state.lock().problems.iter().map(SolverProblem::node).collect();
        let removed: HashSet<NodeId> = tracked.into_iter().filter(|node| !self.proof.find(*node)).collect();

        let (newly_solved, idle) = {
            let mut state = self.state.lock();
            if state.in_flight.remove(&batch).is_none() {
                debug!(proof = %self.proof.id(), %batch, "Discarding stale completion");
                return;
            }

            let RunnerState {
                problems,
                solved,
                in_flight,
                ..
            } = &mut *state;
            let mut newly_solved = 0usize;
            for problem in problems.iter_mut().filter(|p| p.batch() == batch) {
                let outcome = outcomes.iter().find(|o| o.node == problem.node());
                let status = outcome.map_or(ResultStatus::Unknown, |o| o.status);
                if let Some(reason) = outcome.and_then(|o| o.reason.as_deref()) {
                    debug!(%batch, node = problem.node().0, reason, "No conclusive answer");
                }
                if problem.resolve(batch, status)
                    && status == ResultStatus::Valid
                    && still_present.contains(&problem.node())
                    && solved.insert(problem.node())
                {
                    newly_solved += 1;
                }
            }
            // Entries for pruned nodes are dead once their batch is over
            problems.retain(|p| !removed.contains(&p.node()) || in_flight.contains_key(&p.batch()));
            (newly_solved, in_flight.is_empty())
        };

        info!(proof = %self.proof.id(), %batch, solved = newly_solved, "Batch completed");
        drop(transition);
        self.listeners.notify();
        if idle {
            self.idle.notify_waiters();
        }
    }

    fn refresh_settings(&self, settings: Arc<RunnerSettings>) {
        let stopped = {
            let mut state = self.state.lock();
            let stopped = state.take_in_flight();
            *self.settings.write() = settings;
            state.dispatched.clear();
            state.problems.clear();
            stopped
        };
        self.after_stop(&stopped);
        debug!(proof = %self.proof.id(), stopped = stopped.len(), "Settings refreshed");
    }

    fn set_solver_types(self: &Arc<Self>, solver_types: BTreeSet<SolverType>) -> Option<BatchId> {
        {
            let mut settings = self.settings.write();
            let mut next = RunnerSettings::clone(&settings);
            next.solver_types = solver_types;
            *settings = Arc::new(next);
        }
        if !self.accepting() {
            return None;
        }
        let _transition = Transition::enter(&self.dispatching);
        let goals = self.proof.open_goals();
        self.dispatch_goals(goals, DispatchMode::Retry)
    }

    fn stop_all(&self) {
        let stopped = self.state.lock().take_in_flight();
        self.after_stop(&stopped);
    }

    fn after_stop(&self, stopped: &[BatchId]) {
        for batch in stopped {
            self.launcher.stop(*batch);
        }
        if !stopped.is_empty() {
            debug!(proof = %self.proof.id(), batches = stopped.len(), "Stopped running batches");
        }
        self.idle.notify_waiters();
    }

    fn close(&self, reason: &str) {
        let (stopped, subscription) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.suspended = false;
            let stopped = state.take_in_flight();
            state.dispatched.clear();
            state.solved.clear();
            state.problems.clear();
            (stopped, state.subscription.take())
        };
        self.after_stop(&stopped);
        info!(proof = %self.proof.id(), reason, "Background solver runner closed");

        self.listeners.notify();
        if let Some(subscription) = subscription {
            self.proof.unsubscribe(subscription);
        }
        self.listeners.clear();
    }
}

impl Drop for RunnerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.in_flight.is_empty() {
            warn!(batches = state.in_flight.len(), "Runner dropped with batches in flight");
        }
        state.take_in_flight();
        if let Some(subscription) = state.subscription.take() {
            self.proof.unsubscribe(subscription);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProof;
    use crate::test_support::{seq, ScriptedLauncher};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn z3() -> Arc<RunnerSettings> {
        Arc::new(RunnerSettings::default().with_solver(SolverType::Z3))
    }

    fn runner_for(proof: &Arc<MemoryProof>, launcher: &Arc<ScriptedLauncher>) -> BackgroundSolverRunner {
        BackgroundSolverRunner::new(proof.clone(), z3(), launcher.clone(), Handle::current())
    }

    #[tokio::test]
    async fn test_no_dispatch_on_construction() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::new());
        let runner = runner_for(&proof, &launcher);

        assert_eq!(runner.phase(), RunnerPhase::Idle);
        assert_eq!(launcher.launch_count(), 0);
        assert_eq!(proof.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_is_idempotent_before_completion() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a"), seq("b")]));
        let launcher = Arc::new(ScriptedLauncher::gated());
        let runner = runner_for(&proof, &launcher);

        assert!(runner.dispatch_open_goals().is_some());
        assert!(runner.dispatch_open_goals().is_none());
        assert_eq!(runner.in_flight().len(), 1);
        assert_eq!(runner.phase(), RunnerPhase::Running);

        launcher.release_all();
        runner.wait_idle().await;
        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(launcher.requests()[0].problems.len(), 2);
    }

    #[tokio::test]
    async fn test_no_solvers_means_no_launch() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::new());
        let runner = BackgroundSolverRunner::new(
            proof.clone(),
            Arc::new(RunnerSettings::default()),
            launcher.clone(),
            Handle::current(),
        );

        assert!(runner.dispatch_open_goals().is_none());
        assert_eq!(runner.status().dispatched, 0);
    }

    #[tokio::test]
    async fn test_valid_outcome_marks_solved() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a"), seq("b")]));
        let launcher = Arc::new(ScriptedLauncher::new().with_result(seq("a"), ResultStatus::Valid));
        let runner = runner_for(&proof, &launcher);

        runner.dispatch_open_goals();
        runner.wait_idle().await;

        let goals = proof.open_goals();
        assert_eq!(runner.solved_nodes(), vec![goals[0].node]);
        assert_eq!(runner.cached_result(&seq("a")), Some(ResultStatus::Valid));
        assert_eq!(runner.cached_result(&seq("b")), None);
        assert_eq!(runner.phase(), RunnerPhase::Idle);
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::gated().with_result(seq("a"), ResultStatus::Valid));
        let runner = runner_for(&proof, &launcher);
        let node = proof.open_goals()[0].node;

        let batch = runner.dispatch_open_goals().unwrap();
        runner.stop_all();
        assert!(runner.in_flight().is_empty());

        runner.on_launcher_completed(
            batch,
            vec![ProblemOutcome::solved(node, ResultStatus::Valid, SolverType::Z3, Duration::ZERO)],
        );
        assert!(runner.solved_nodes().is_empty());
        assert_eq!(runner.cached_result(&seq("a")), None);
        assert_eq!(launcher.stopped(), vec![batch]);
    }

    #[tokio::test]
    async fn test_missing_outcome_is_unknown() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::gated());
        let runner = runner_for(&proof, &launcher);

        let batch = runner.dispatch_open_goals().unwrap();
        runner.on_launcher_completed(batch, Vec::new());

        let problems = runner.problems();
        assert_eq!(problems[0].result(), Some(ResultStatus::Unknown));
        assert!(runner.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_valid_for_removed_node_is_not_solved() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::gated());
        let runner = runner_for(&proof, &launcher);
        let goal = proof.open_goals()[0].node;
        let children = proof.apply_rule(goal, "split", vec![seq("c")]).unwrap();
        let child = children[0].node;

        // The rule application dispatched the child
        let batch = runner.in_flight()[0];
        proof.prune_to(goal).unwrap();
        assert!(!proof.find(child));

        runner.on_launcher_completed(
            batch,
            vec![ProblemOutcome::solved(child, ResultStatus::Valid, SolverType::Z3, Duration::ZERO)],
        );
        assert!(!runner.is_solved(child));
    }

    #[tokio::test]
    async fn test_completion_drops_problems_of_pruned_nodes() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::gated());
        let runner = runner_for(&proof, &launcher);
        let goal = proof.open_goals()[0].node;
        let children = proof.apply_rule(goal, "split", vec![seq("c"), seq("d")]).unwrap();
        let child_batch = runner.in_flight()[0];

        // Pruning re-opens the goal and dispatches it in a second batch
        proof.prune_to(goal).unwrap();
        let batches = runner.in_flight();
        assert_eq!(batches.len(), 2);
        let goal_batch = batches[1];

        runner.on_launcher_completed(child_batch, Vec::new());
        let problems = runner.problems();
        assert!(problems.iter().all(|p| children.iter().all(|c| c.node != p.node())));
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].batch(), goal_batch);
        assert_eq!(problems[0].node(), goal);
    }

    #[tokio::test]
    async fn test_auto_mode_suspends_dispatch() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::new());
        let runner = runner_for(&proof, &launcher);

        proof.start_auto_mode();
        assert_eq!(runner.phase(), RunnerPhase::Suspended);
        let goal = proof.open_goals()[0].node;
        proof.apply_rule(goal, "step", vec![seq("b")]).unwrap();
        assert!(runner.dispatch_open_goals().is_none());
        assert_eq!(launcher.launch_count(), 0);

        proof.stop_auto_mode();
        runner.wait_idle().await;
        assert_eq!(launcher.launch_count(), 1);
        assert!(!runner.is_suspended());
    }

    #[tokio::test]
    async fn test_refresh_settings_keeps_solved_and_allows_redispatch() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::new().with_result(seq("a"), ResultStatus::Valid));
        let runner = runner_for(&proof, &launcher);

        runner.dispatch_open_goals();
        runner.wait_idle().await;
        assert_eq!(runner.solved_nodes().len(), 1);

        runner.refresh_settings(Arc::new(
            RunnerSettings::default().with_solvers([SolverType::Cvc5]),
        ));
        assert_eq!(runner.status().dispatched, 0);
        assert!(runner.problems().is_empty());
        assert_eq!(runner.solved_nodes().len(), 1);
        assert!(runner.settings().solver_types.contains(&SolverType::Cvc5));

        assert!(runner.dispatch_open_goals().is_some());
        runner.wait_idle().await;
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_set_solver_types_retries_unresolved_goals() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a"), seq("b")]));
        let launcher = Arc::new(ScriptedLauncher::new().with_result(seq("a"), ResultStatus::Valid));
        let runner = runner_for(&proof, &launcher);

        runner.dispatch_open_goals();
        runner.wait_idle().await;

        let batch = runner
            .set_solver_types([SolverType::Z3, SolverType::Cvc5].into_iter().collect())
            .unwrap();
        runner.wait_idle().await;

        let request = launcher.request(batch).unwrap();
        assert_eq!(request.problems.len(), 1);
        assert_eq!(request.problems[0].sequent, seq("b"));
        assert_eq!(request.settings.solver_types.len(), 2);
    }

    #[tokio::test]
    async fn test_rule_application_after_close_is_ignored() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::new());
        let runner = runner_for(&proof, &launcher);
        runner.shutdown();

        let goals = proof.open_goals();
        assert!(runner.on_rule_applied(goals).is_none());
        assert!(!runner.is_suspended());
        assert_eq!(runner.phase(), RunnerPhase::Closed);
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_proof_closed_resets_and_detaches() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a"), seq("b")]));
        let launcher = Arc::new(ScriptedLauncher::new().with_result(seq("a"), ResultStatus::Valid));
        let runner = runner_for(&proof, &launcher);
        let refreshes = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&refreshes);
        let _registration = runner.add_listener(Arc::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        runner.dispatch_open_goals();
        runner.wait_idle().await;
        let before = refreshes.load(Ordering::SeqCst);

        for goal in proof.open_goals() {
            proof.apply_rule(goal.node, "close", vec![]).unwrap();
        }

        assert!(runner.is_closed());
        assert_eq!(runner.phase(), RunnerPhase::Closed);
        assert!(runner.solved_nodes().is_empty());
        assert_eq!(runner.status().dispatched, 0);
        assert_eq!(proof.subscriber_count(), 0);
        assert_eq!(refreshes.load(Ordering::SeqCst), before + 1);
        assert!(runner.dispatch_open_goals().is_none());
    }

    #[tokio::test]
    async fn test_tree_structure_change_dispatches_reopened_goal() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![seq("a")]));
        let launcher = Arc::new(ScriptedLauncher::new());
        let runner = runner_for(&proof, &launcher);
        let goal = proof.open_goals()[0].node;

        // Not dispatched yet: splitting hands out the children only
        proof.apply_rule(goal, "split", vec![seq("x")]).unwrap();
        runner.wait_idle().await;
        assert_eq!(launcher.launch_count(), 1);

        proof.prune_to(goal).unwrap();
        runner.wait_idle().await;
        assert_eq!(launcher.launch_count(), 2);
        let request = launcher.requests().pop().unwrap();
        assert_eq!(request.problems[0].node, goal);
    }

    #[tokio::test]
    async fn test_dropping_runner_unsubscribes() {
        let proof = Arc::new(MemoryProof::with_goals("p", vec![Sequent::default()]));
        let launcher = Arc::new(ScriptedLauncher::new());
        let runner = runner_for(&proof, &launcher);
        assert_eq!(proof.subscriber_count(), 1);
        drop(runner);
        assert_eq!(proof.subscriber_count(), 0);
    }
}
