//! View models for background solver status
//!
//! Front ends render these; nothing here draws anything.

use crate::proof::NodeId;
use crate::registry::{ApplyOutcome, RunnerRegistry};
use crate::runner::BackgroundSolverRunner;
use serde::Serialize;

/// One solved goal in the status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub node: NodeId,
    /// `Node <step index>`
    pub label: String,
    pub selected: bool,
}

/// Solved goals of one proof, with a selection for bulk apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub title: String,
    pub rows: Vec<StatusRow>,
}

impl StatusReport {
    /// Report over the solved nodes of `runner`; every row starts selected
    pub fn for_runner(runner: &BackgroundSolverRunner) -> Self {
        let proof = runner.proof();
        let rows = runner
            .solved_nodes()
            .into_iter()
            .filter(|node| proof.find(*node))
            .map(|node| StatusRow {
                node,
                label: format!("Node {}", proof.step_index(node).unwrap_or(node.0)),
                selected: true,
            })
            .collect();
        Self {
            title: format!("Background SMT Status: {}", proof.name()),
            rows,
        }
    }

    pub fn select_all(&mut self, selected: bool) {
        for row in &mut self.rows {
            row.selected = selected;
        }
    }

    /// Flip the selection of the row for `node`, if any
    pub fn toggle(&mut self, node: NodeId) {
        if let Some(row) = self.rows.iter_mut().find(|row| row.node == node) {
            row.selected = !row.selected;
        }
    }

    pub fn selected(&self) -> Vec<NodeId> {
        self.rows
            .iter()
            .filter(|row| row.selected)
            .map(|row| row.node)
            .collect()
    }

    /// Apply the background result for every selected row
    pub fn apply_selected(&self, registry: &RunnerRegistry) -> Vec<(NodeId, ApplyOutcome)> {
        self.selected()
            .into_iter()
            .map(|node| (node, registry.apply_result(node)))
            .collect()
    }
}

/// State of the status-line indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndicatorState {
    pub enabled: bool,
    pub highlighted: bool,
}

impl IndicatorState {
    /// Enabled and highlighted iff the active runner has solved nodes
    pub fn for_registry(registry: &RunnerRegistry) -> Self {
        let solved = registry
            .active_runner()
            .is_some_and(|runner| !runner.solved_nodes().is_empty());
        Self {
            enabled: solved,
            highlighted: solved,
        }
    }
}

/// Decoration of a proof tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeDecoration {
    /// Offer the apply action next to the node
    Applicable,
    Plain,
}

/// How `node` of the active proof should be drawn
pub fn decorate(registry: &RunnerRegistry, node: NodeId) -> NodeDecoration {
    let leaf = registry
        .active_runner()
        .is_some_and(|runner| runner.proof().is_leaf(node));
    if leaf && registry.can_apply(node) {
        NodeDecoration::Applicable
    } else {
        NodeDecoration::Plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProof;
    use crate::problem::ResultStatus;
    use crate::proof::ProofHandle;
    use crate::settings::{RunnerSettings, SolverType};
    use crate::test_support::{seq, ScriptedLauncher};
    use std::sync::Arc;
    use tokio::runtime::Handle;

    async fn solved_registry() -> (RunnerRegistry, Arc<MemoryProof>, BackgroundSolverRunner) {
        let launcher = Arc::new(
            ScriptedLauncher::new()
                .with_result(seq("a"), ResultStatus::Valid)
                .with_result(seq("c"), ResultStatus::Valid),
        );
        let registry = RunnerRegistry::new(
            RunnerSettings::default().with_solver(SolverType::Z3),
            launcher,
            Handle::current(),
        );
        let proof = Arc::new(MemoryProof::with_goals(
            "demo",
            vec![seq("a"), seq("b"), seq("c")],
        ));
        let runner = registry.on_proof_selected(proof.clone());
        runner.wait_idle().await;
        (registry, proof, runner)
    }

    #[tokio::test]
    async fn test_report_lists_solved_nodes() {
        let (_registry, proof, runner) = solved_registry().await;
        let report = StatusReport::for_runner(&runner);
        let goals = proof.open_goals();

        assert_eq!(report.title, "Background SMT Status: demo");
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].label, format!("Node {}", goals[0].node.0));
        assert_eq!(report.selected(), vec![goals[0].node, goals[2].node]);
    }

    #[tokio::test]
    async fn test_selection_and_apply() {
        let (registry, proof, runner) = solved_registry().await;
        let mut report = StatusReport::for_runner(&runner);
        let goals = proof.open_goals();

        report.select_all(false);
        assert!(report.selected().is_empty());
        report.toggle(goals[2].node);

        let applied = report.apply_selected(&registry);
        assert_eq!(applied, vec![(goals[2].node, ApplyOutcome::Applied)]);
        assert!(proof.is_node_closed(goals[2].node));
        assert!(!proof.is_node_closed(goals[0].node));
    }

    #[tokio::test]
    async fn test_indicator_and_decoration() {
        let (registry, proof, _runner) = solved_registry().await;
        let goals = proof.open_goals();

        let indicator = IndicatorState::for_registry(&registry);
        assert!(indicator.enabled && indicator.highlighted);
        assert_eq!(decorate(&registry, goals[0].node), NodeDecoration::Applicable);
        assert_eq!(decorate(&registry, goals[1].node), NodeDecoration::Plain);
        assert_eq!(decorate(&registry, proof.root()), NodeDecoration::Plain);
    }

    #[tokio::test]
    async fn test_indicator_without_active_runner() {
        let registry = RunnerRegistry::new(
            RunnerSettings::default(),
            Arc::new(ScriptedLauncher::new()),
            Handle::current(),
        );
        assert_eq!(IndicatorState::for_registry(&registry), IndicatorState::default());
    }
}
