//! In-memory proof tree
//!
//! A small [`ProofHandle`] implementation without any calculus behind it:
//! rules are applied by naming the sequents of the new goals. The headless
//! front end uses it to run background solvers over a list of goals, and the
//! tests use it to drive runners through realistic event sequences.

use crate::error::ProofError;
use crate::proof::{
    Goal, NodeId, ProofEvent, ProofEventSink, ProofHandle, ProofId, Sequent, SubscriptionId,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_PROOF_ID: AtomicU64 = AtomicU64::new(1);

/// Rule name recorded by [`ProofHandle::apply_smt_rule`]
pub const SMT_RULE_NAME: &str = "SMT";

#[derive(Debug, Clone)]
struct TreeNode {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    sequent: Sequent,
    /// Closed by a closing rule; only meaningful for leaves
    closed_leaf: bool,
    /// Removed by pruning
    removed: bool,
    rule: Option<String>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    fn get(&self, node: NodeId) -> Option<&TreeNode> {
        usize::try_from(node.0)
            .ok()
            .and_then(|i| self.nodes.get(i))
            .filter(|n| !n.removed)
    }

    fn get_mut(&mut self, node: NodeId) -> Option<&mut TreeNode> {
        usize::try_from(node.0)
            .ok()
            .and_then(|i| self.nodes.get_mut(i))
            .filter(|n| !n.removed)
    }

    fn push(&mut self, parent: Option<NodeId>, sequent: Sequent) -> NodeId {
        let id = NodeId(self.nodes.len() as u64);
        self.nodes.push(TreeNode {
            parent,
            children: Vec::new(),
            sequent,
            closed_leaf: false,
            removed: false,
            rule: None,
        });
        if let Some(parent) = parent {
            if let Some(p) = self.get_mut(parent) {
                p.children.push(id);
            }
        }
        id
    }

    fn is_goal(&self, node: NodeId) -> bool {
        self.get(node)
            .is_some_and(|n| n.children.is_empty() && !n.closed_leaf)
    }

    fn is_closed(&self, node: NodeId) -> bool {
        match self.get(node) {
            None => false,
            Some(n) if n.children.is_empty() => n.closed_leaf,
            Some(n) => n.children.iter().all(|c| self.is_closed(*c)),
        }
    }

    fn goals(&self) -> Vec<Goal> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.removed && n.children.is_empty() && !n.closed_leaf)
            .map(|(i, n)| Goal::new(NodeId(i as u64), n.sequent.clone()))
            .collect()
    }

    fn remove_subtree(&mut self, node: NodeId) {
        let children = self.get(node).map(|n| n.children.clone()).unwrap_or_default();
        for child in children {
            self.remove_subtree(child);
            if let Some(c) = self.get_mut(child) {
                c.removed = true;
            }
        }
    }
}

#[derive(Default)]
struct Delivery {
    paused: usize,
    held: Vec<ProofEvent>,
}

/// Proof tree held in memory
pub struct MemoryProof {
    id: ProofId,
    name: String,
    tree: Mutex<Tree>,
    sinks: Mutex<Vec<(SubscriptionId, Arc<dyn ProofEventSink>)>>,
    delivery: Mutex<Delivery>,
    next_subscription: AtomicU64,
}

impl MemoryProof {
    /// Proof with a single open root goal
    pub fn new(name: impl Into<String>, root: Sequent) -> Self {
        let mut tree = Tree::default();
        tree.push(None, root);
        Self {
            id: ProofId(NEXT_PROOF_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            tree: Mutex::new(tree),
            sinks: Mutex::new(Vec::new()),
            delivery: Mutex::new(Delivery::default()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Proof whose root was split into one open goal per sequent
    ///
    /// No events are emitted while building.
    pub fn with_goals(name: impl Into<String>, goals: Vec<Sequent>) -> Self {
        let proof = Self::new(name, Sequent::default());
        {
            let mut tree = proof.tree.lock();
            if let Some(root) = tree.get_mut(NodeId(0)) {
                root.rule = Some("split".to_string());
            }
            for sequent in goals {
                tree.push(Some(NodeId(0)), sequent);
            }
        }
        proof
    }

    /// Root node
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Children of a node
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .lock()
            .get(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Parent of a node
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.lock().get(node).and_then(|n| n.parent)
    }

    /// Sequent currently attached to a node
    pub fn sequent(&self, node: NodeId) -> Option<Sequent> {
        self.tree.lock().get(node).map(|n| n.sequent.clone())
    }

    /// Name of the rule applied at a node
    pub fn rule_at(&self, node: NodeId) -> Option<String> {
        self.tree.lock().get(node).and_then(|n| n.rule.clone())
    }

    /// Apply a rule to an open goal, creating one child goal per sequent
    ///
    /// An empty `new_sequents` closes the goal.
    pub fn apply_rule(
        &self,
        node: NodeId,
        rule: &str,
        new_sequents: Vec<Sequent>,
    ) -> Result<Vec<Goal>, ProofError> {
        let (new_goals, closed) = {
            let mut tree = self.tree.lock();
            if tree.get(node).is_none() {
                return Err(ProofError::UnknownNode(node.0));
            }
            if !tree.is_goal(node) {
                return Err(ProofError::NotAGoal(node.0));
            }
            let closing = new_sequents.is_empty();
            if let Some(n) = tree.get_mut(node) {
                n.rule = Some(rule.to_string());
                n.closed_leaf = closing;
            }
            let goals: Vec<Goal> = new_sequents
                .into_iter()
                .map(|s| {
                    let id = tree.push(Some(node), s.clone());
                    Goal::new(id, s)
                })
                .collect();
            (goals, tree.is_closed(NodeId(0)))
        };

        debug!(proof = %self.id, node = node.0, rule, goals = new_goals.len(), "Rule applied");
        self.emit(ProofEvent::RuleApplied {
            new_goals: new_goals.clone(),
        });
        if closed {
            self.emit(ProofEvent::ProofClosed);
        }
        Ok(new_goals)
    }

    /// Signal that the automatic strategy started
    pub fn start_auto_mode(&self) {
        self.emit(ProofEvent::AutoModeStarted);
    }

    /// Signal that the automatic strategy stopped
    pub fn stop_auto_mode(&self) {
        self.emit(ProofEvent::AutoModeStopped);
    }

    /// Number of subscribed sinks
    pub fn subscriber_count(&self) -> usize {
        self.sinks.lock().len()
    }

    fn emit(&self, event: ProofEvent) {
        {
            let mut delivery = self.delivery.lock();
            if delivery.paused > 0 {
                delivery.held.push(event);
                return;
            }
        }
        self.deliver(&event);
    }

    fn deliver(&self, event: &ProofEvent) {
        let sinks: Vec<Arc<dyn ProofEventSink>> =
            self.sinks.lock().iter().map(|(_, s)| Arc::clone(s)).collect();
        for sink in sinks {
            sink.proof_event(event);
        }
    }
}

impl ProofHandle for MemoryProof {
    fn id(&self) -> ProofId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn open_goals(&self) -> Vec<Goal> {
        self.tree.lock().goals()
    }

    fn is_goal(&self, node: NodeId) -> bool {
        self.tree.lock().is_goal(node)
    }

    fn find(&self, node: NodeId) -> bool {
        self.tree.lock().get(node).is_some()
    }

    fn is_leaf(&self, node: NodeId) -> bool {
        self.tree
            .lock()
            .get(node)
            .is_some_and(|n| n.children.is_empty())
    }

    fn is_node_closed(&self, node: NodeId) -> bool {
        self.tree.lock().is_closed(node)
    }

    fn is_closed(&self) -> bool {
        self.tree.lock().is_closed(NodeId(0))
    }

    fn goal(&self, node: NodeId) -> Option<Goal> {
        let tree = self.tree.lock();
        if !tree.is_goal(node) {
            return None;
        }
        tree.get(node).map(|n| Goal::new(node, n.sequent.clone()))
    }

    fn step_index(&self, node: NodeId) -> Option<u64> {
        self.tree.lock().get(node).map(|_| node.0)
    }

    fn node_name(&self, node: NodeId) -> String {
        match self.tree.lock().get(node).and_then(|n| n.rule.clone()) {
            Some(rule) => format!("{}:{rule}", node.0),
            None => format!("{}:OPEN GOAL", node.0),
        }
    }

    fn prune_to(&self, node: NodeId) -> Result<(), ProofError> {
        {
            let mut tree = self.tree.lock();
            if tree.get(node).is_none() {
                return Err(ProofError::UnknownNode(node.0));
            }
            tree.remove_subtree(node);
            if let Some(n) = tree.get_mut(node) {
                n.children.clear();
                n.closed_leaf = false;
                n.rule = None;
            }
        }
        debug!(proof = %self.id, node = node.0, "Pruned");
        self.emit(ProofEvent::TreeStructureChanged);
        Ok(())
    }

    fn apply_smt_rule(&self, goal: &Goal, title: &str) -> Result<(), ProofError> {
        let rule = format!("{SMT_RULE_NAME} ({title})");
        self.apply_rule(goal.node, &rule, Vec::new()).map(|_| ())
    }

    fn pause_events(&self) {
        self.delivery.lock().paused += 1;
    }

    fn resume_events(&self) {
        let held = {
            let mut delivery = self.delivery.lock();
            delivery.paused = delivery.paused.saturating_sub(1);
            if delivery.paused > 0 {
                return;
            }
            std::mem::take(&mut delivery.held)
        };
        for event in &held {
            self.deliver(event);
        }
    }

    fn subscribe(&self, sink: Arc<dyn ProofEventSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.sinks.lock().push((id, sink));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.sinks.lock().retain(|(sid, _)| *sid != id);
    }
}

impl std::fmt::Debug for MemoryProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProof")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
