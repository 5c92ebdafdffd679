//! # Rule Graph
//!
//! Directed multigraph derived from an engine's rule set: nodes are
//! classes, edges are rules (start → goal). Parallel edges between the
//! same ordered pair of nodes are permitted; each represents an
//! independently applicable rule.
//!
//! The graph is immutable once built. Rebuilding after rule-set changes
//! produces a fresh graph rather than mutating the old one. All ordering
//! is deterministic: node ids follow first appearance across the rule
//! set, edge ids follow rule registration order.

use crate::types::{Class, ClassId, ClassRef, Rule, RuleRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a class node within one rule graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Identifier of a rule edge within one rule graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub usize);

// =============================================================================
// EDGE
// =============================================================================

/// A directed rule edge: start class → goal class, labeled with the rule.
#[derive(Debug, Clone)]
pub struct RuleEdge {
    /// Node of the rule's start class.
    pub start: NodeId,
    /// Node of the rule's goal class.
    pub goal: NodeId,
    /// The rule this edge represents.
    pub rule: RuleRef,
}

// =============================================================================
// RULE GRAPH
// =============================================================================

/// The class-node / rule-edge multigraph.
#[derive(Debug, Clone, Default)]
pub struct RuleGraph {
    /// Class nodes, in order of first appearance.
    classes: Vec<ClassRef>,
    /// Node lookup by class identity.
    class_index: BTreeMap<ClassId, NodeId>,
    /// Rule edges, in rule registration order.
    edges: Vec<RuleEdge>,
    /// Outgoing edge ids per node, in edge insertion order.
    outgoing: BTreeMap<NodeId, Vec<EdgeId>>,
}

impl RuleGraph {
    /// Build a graph from a rule set.
    ///
    /// One node per distinct class referenced as a start or goal, one
    /// edge per rule.
    #[must_use]
    pub fn new(rules: &[RuleRef]) -> Self {
        let mut graph = Self::default();
        for rule in rules {
            let start = graph.intern(rule.start());
            let goal = graph.intern(rule.goal());
            let edge_id = EdgeId(graph.edges.len());
            graph.edges.push(RuleEdge {
                start,
                goal,
                rule: rule.clone(),
            });
            graph.outgoing.entry(start).or_default().push(edge_id);
        }
        graph
    }

    /// Insert a class node if its identity is new; return its id.
    fn intern(&mut self, class: ClassRef) -> NodeId {
        let id = class.id();
        if let Some(&node) = self.class_index.get(&id) {
            return node;
        }
        let node = NodeId(self.classes.len());
        self.classes.push(class);
        self.class_index.insert(id, node);
        node
    }

    /// The class at a node.
    #[must_use]
    pub fn class(&self, node: NodeId) -> Option<&ClassRef> {
        self.classes.get(node.0)
    }

    /// All class nodes, in insertion order.
    #[must_use]
    pub fn classes(&self) -> &[ClassRef] {
        &self.classes
    }

    /// The node holding a class identity, if present.
    #[must_use]
    pub fn node_of(&self, class: &ClassId) -> Option<NodeId> {
        self.class_index.get(class).copied()
    }

    /// The edge with the given id.
    #[must_use]
    pub fn edge(&self, edge: EdgeId) -> Option<&RuleEdge> {
        self.edges.get(edge.0)
    }

    /// All rule edges, in rule registration order.
    #[must_use]
    pub fn edges(&self) -> &[RuleEdge] {
        &self.edges
    }

    /// Outgoing edge ids of a node, in edge insertion order.
    #[must_use]
    pub fn outgoing(&self, node: NodeId) -> &[EdgeId] {
        self.outgoing.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Number of class nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of rule edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
