//! Proof engine interface
//!
//! The core never owns proof data structures. It observes a proof through
//! [`ProofHandle`] and receives lifecycle notifications as [`ProofEvent`]s on
//! a subscribed [`ProofEventSink`].

use crate::error::ProofError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of a proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProofId(pub u64);

impl fmt::Display for ProofId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proof#{}", self.0)
    }
}

/// Stable identity of a proof tree node
///
/// A node keeps its identity across pruning, but the sequent it carries may
/// change, so result caching is keyed by [`Sequent`] and not by node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical content of a goal at one point in time
///
/// Formulas are kept in SMT-LIB surface syntax. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Sequent {
    /// Assumptions
    pub antecedent: Vec<String>,
    /// Claims, read as a disjunction
    pub succedent: Vec<String>,
}

impl Sequent {
    pub fn new(antecedent: Vec<String>, succedent: Vec<String>) -> Self {
        Self {
            antecedent,
            succedent,
        }
    }
}

impl fmt::Display for Sequent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ==> {}",
            self.antecedent.join(", "),
            self.succedent.join(", ")
        )
    }
}

/// An open goal: a leaf node together with its current sequent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub node: NodeId,
    pub sequent: Sequent,
}

impl Goal {
    pub fn new(node: NodeId, sequent: Sequent) -> Self {
        Self { node, sequent }
    }
}

/// Lifecycle notifications emitted by a proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofEvent {
    /// A rule (or a macro counting as one rule) was applied
    RuleApplied {
        /// Goals created by the application
        new_goals: Vec<Goal>,
    },
    /// The automatic strategy started
    AutoModeStarted,
    /// The automatic strategy stopped
    AutoModeStopped,
    /// The tree changed shape without a rule application (e.g. pruning)
    TreeStructureChanged,
    /// Every goal of the proof is closed
    ProofClosed,
}

/// Handle returned by [`ProofHandle::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiver of proof events
///
/// Implementations are called on the thread that mutated the proof and must
/// not call back into the proof's subscription methods while holding locks
/// the proof might need.
pub trait ProofEventSink: Send + Sync {
    fn proof_event(&self, event: &ProofEvent);
}

/// The proof engine as seen by the background runner
pub trait ProofHandle: Send + Sync {
    /// Identity used to key runners
    fn id(&self) -> ProofId;

    /// Display name
    fn name(&self) -> String;

    /// Currently open goals
    fn open_goals(&self) -> Vec<Goal>;

    /// Whether the node is an open goal
    fn is_goal(&self, node: NodeId) -> bool;

    /// Whether the node is still part of the proof tree
    fn find(&self, node: NodeId) -> bool;

    /// Whether the node has no children
    fn is_leaf(&self, node: NodeId) -> bool;

    /// Whether the subtree below the node is closed
    fn is_node_closed(&self, node: NodeId) -> bool;

    /// Whether the whole proof is closed
    fn is_closed(&self) -> bool;

    /// The goal at a node, if the node is an open goal
    fn goal(&self, node: NodeId) -> Option<Goal>;

    /// Serial number of the node, used for display
    fn step_index(&self, node: NodeId) -> Option<u64>;

    /// Human-readable node name
    fn node_name(&self, node: NodeId) -> String;

    /// Remove everything below `node`, making it a goal again
    fn prune_to(&self, node: NodeId) -> Result<(), ProofError>;

    /// Close `goal` with the rule that trusts a background SMT result
    fn apply_smt_rule(&self, goal: &Goal, title: &str) -> Result<(), ProofError>;

    /// Stop delivering events to interactive listeners
    fn pause_events(&self);

    /// Resume event delivery, flushing anything held back
    fn resume_events(&self);

    /// Register an event sink
    fn subscribe(&self, sink: Arc<dyn ProofEventSink>) -> SubscriptionId;

    /// Remove an event sink; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Pauses a proof's event delivery until dropped
///
/// Listeners never observe a half-applied mutation, even when the mutation
/// returns early with an error.
pub struct EventPause<'a> {
    proof: &'a dyn ProofHandle,
}

impl<'a> EventPause<'a> {
    pub fn new(proof: &'a dyn ProofHandle) -> Self {
        proof.pause_events();
        Self { proof }
    }
}

impl Drop for EventPause<'_> {
    fn drop(&mut self) {
        self.proof.resume_events();
    }
}
