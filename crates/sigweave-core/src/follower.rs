//! # Follower
//!
//! The correlation traversal engine. Given seed objects and a traversal
//! scope, the follower walks outward along rule-graph edges whose start
//! class matches the current object's class, executes each generated
//! query through the engine, and folds newly retrieved objects into the
//! frontier.
//!
//! Guarantees:
//! - a `(class, key)` pair is never expanded twice; revisits add an edge
//!   to the existing node, so cycles in the rule graph terminate
//! - rule application follows rule-graph edge insertion order, so output
//!   is deterministic for a fixed rule set and fixed store responses
//! - a single rule or store failure never aborts the traversal; failures
//!   are recorded per edge and returned with the best-effort graph
//! - cancellation is checked before each store call and surfaces as a
//!   dedicated condition alongside the partial graph

use crate::engine::Engine;
use crate::result::ListResult;
use crate::types::{
    Class, ClassId, ClassRef, Constraint, Key, Object, QueryRef, Rule, RuleRef, SigweaveError,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pseudo rule name used for seed-intake failures in [`EdgeError`].
const SEED: &str = "<seed>";

// =============================================================================
// CORRELATION GRAPH
// =============================================================================

/// Identifier of an object node within one correlation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectNodeId(pub usize);

/// A discovered object: one `(class, key)` occurrence.
#[derive(Debug, Clone)]
pub struct ObjectNode {
    /// The object's class.
    pub class: ClassRef,
    /// The object itself.
    pub object: Object,
    /// De-duplication key within the class.
    pub key: Key,
    /// Number of rule hops from the nearest seed at first discovery.
    pub depth: usize,
}

/// A rule application: provenance of how one object led to another.
#[derive(Debug, Clone)]
pub struct ObjectEdge {
    /// The object the rule was applied to.
    pub from: ObjectNodeId,
    /// The object the query produced.
    pub to: ObjectNodeId,
    /// The rule that produced the edge.
    pub rule: RuleRef,
    /// The query the rule rendered.
    pub query: QueryRef,
}

/// The navigable correlation result graph.
///
/// Nodes are deduplicated by `(class, key)`; multiple arrival paths are
/// recorded as additional edges onto the same node. Results live for one
/// traversal's lifetime.
#[derive(Debug, Default)]
pub struct CorrelationGraph {
    nodes: Vec<ObjectNode>,
    index: BTreeMap<(ClassId, Key), ObjectNodeId>,
    edges: Vec<ObjectEdge>,
    /// Collapses exact-duplicate `(from, to, rule name)` edges.
    edge_keys: BTreeSet<(ObjectNodeId, ObjectNodeId, String)>,
}

impl CorrelationGraph {
    fn add_node(&mut self, class: ClassRef, object: Object, key: Key, depth: usize) -> ObjectNodeId {
        let id = ObjectNodeId(self.nodes.len());
        self.index.insert((class.id(), key.clone()), id);
        self.nodes.push(ObjectNode {
            class,
            object,
            key,
            depth,
        });
        id
    }

    fn add_edge(&mut self, from: ObjectNodeId, to: ObjectNodeId, rule: RuleRef, query: QueryRef) {
        if self
            .edge_keys
            .insert((from, to, rule.name().to_string()))
        {
            self.edges.push(ObjectEdge {
                from,
                to,
                rule,
                query,
            });
        }
    }

    /// The node with the given id.
    #[must_use]
    pub fn node(&self, id: ObjectNodeId) -> Option<&ObjectNode> {
        self.nodes.get(id.0)
    }

    /// All nodes, in discovery order.
    #[must_use]
    pub fn nodes(&self) -> &[ObjectNode] {
        &self.nodes
    }

    /// All edges, in discovery order.
    #[must_use]
    pub fn edges(&self) -> &[ObjectEdge] {
        &self.edges
    }

    /// Find the node holding a `(class, key)` occurrence.
    #[must_use]
    pub fn find(&self, class: &ClassId, key: &Key) -> Option<ObjectNodeId> {
        self.index.get(&(class.clone(), key.clone())).copied()
    }

    /// Ids of every node of the given class, in discovery order.
    #[must_use]
    pub fn nodes_of_class(&self, class: &ClassId) -> Vec<ObjectNodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| &node.class.id() == class)
            .map(|(i, _)| ObjectNodeId(i))
            .collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// True if the graph holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// =============================================================================
// TRAVERSAL SCOPE & OUTCOME
// =============================================================================

/// Scope of one traversal.
#[derive(Debug, Clone, Default)]
pub struct TraversalOptions {
    /// Maximum number of rule hops from a seed; nodes at this depth are
    /// not expanded. `None` means unbounded (the visited set still
    /// bounds the walk).
    pub max_depth: Option<usize>,
    /// Classes at which expansion stops. Reached objects appear in the
    /// graph and keep accumulating arrival edges, but are not expanded.
    pub goals: Vec<ClassId>,
    /// Optional time window handed to every rule application.
    pub constraint: Option<Constraint>,
}

/// A non-fatal failure recorded against one traversal edge.
#[derive(Debug, Clone)]
pub struct EdgeError {
    /// Name of the rule whose application or query failed.
    pub rule: String,
    /// Class the failure is associated with.
    pub class: ClassId,
    /// The failure itself.
    pub error: SigweaveError,
}

/// Terminal output of a traversal: the best-effort graph plus every
/// non-fatal error encountered.
#[derive(Debug)]
pub struct TraversalOutcome {
    /// The accumulated correlation graph.
    pub graph: CorrelationGraph,
    /// Per-edge rule-application and store errors, never silently
    /// dropped.
    pub errors: Vec<EdgeError>,
    /// Set if the traversal was stopped by cancellation; the graph holds
    /// the progress made until then.
    pub interrupted: Option<SigweaveError>,
}

// =============================================================================
// FOLLOWER
// =============================================================================

/// A traversal session bound to an engine and a cancellation token.
///
/// Created via [`Engine::follower`].
#[derive(Debug)]
pub struct Follower<'e> {
    engine: &'e Engine,
    ctx: CancellationToken,
}

impl<'e> Follower<'e> {
    pub(crate) fn new(engine: &'e Engine, ctx: CancellationToken) -> Self {
        Self { engine, ctx }
    }

    /// Traverse the rule graph from the given seed objects.
    ///
    /// Seeds whose object is not a member of its stated class are
    /// recorded as errors and skipped.
    pub async fn follow(
        &self,
        seeds: Vec<(ClassRef, Object)>,
        options: &TraversalOptions,
    ) -> TraversalOutcome {
        let rule_graph = self.engine.graph();
        let mut graph = CorrelationGraph::default();
        let mut errors = Vec::new();
        let mut queue = VecDeque::new();

        for (class, object) in seeds {
            match class.key(&object) {
                Some(key) => {
                    if graph.find(&class.id(), &key).is_none() {
                        queue.push_back(graph.add_node(class, object, key, 0));
                    }
                }
                None => {
                    errors.push(EdgeError {
                        rule: SEED.to_string(),
                        class: class.id(),
                        error: SigweaveError::NotAMember(class.id()),
                    });
                }
            }
        }

        while let Some(node_id) = queue.pop_front() {
            let Some(node) = graph.node(node_id) else {
                continue;
            };
            let (class, object, depth) = (node.class.clone(), node.object.clone(), node.depth);

            if options.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            if options.goals.contains(&class.id()) {
                continue;
            }
            let Some(start_node) = rule_graph.node_of(&class.id()) else {
                continue;
            };

            for &edge_id in rule_graph.outgoing(start_node) {
                let Some(edge) = rule_graph.edge(edge_id) else {
                    continue;
                };
                let rule = edge.rule.clone();

                let query = match rule.apply(&object, options.constraint.as_ref()) {
                    Ok(query) => query,
                    Err(error) => {
                        warn!(rule = rule.name(), %error, "rule application failed");
                        errors.push(EdgeError {
                            rule: rule.name().to_string(),
                            class: class.id(),
                            error,
                        });
                        continue;
                    }
                };

                if self.ctx.is_cancelled() {
                    return TraversalOutcome {
                        graph,
                        errors,
                        interrupted: Some(SigweaveError::Cancelled),
                    };
                }

                let goal = rule.goal();
                let mut scratch = ListResult::new();
                match self
                    .engine
                    .get(&self.ctx, &goal, query.as_ref(), &mut scratch)
                    .await
                {
                    Ok(()) => {}
                    Err(SigweaveError::Cancelled) => {
                        return TraversalOutcome {
                            graph,
                            errors,
                            interrupted: Some(SigweaveError::Cancelled),
                        };
                    }
                    Err(error) => {
                        warn!(rule = rule.name(), %error, "store query failed");
                        errors.push(EdgeError {
                            rule: rule.name().to_string(),
                            class: goal.id(),
                            error,
                        });
                        continue;
                    }
                }

                for found in scratch.into_objects() {
                    let Some(key) = goal.key(&found) else {
                        debug!(
                            rule = rule.name(),
                            class = %goal.id(),
                            "dropping non-member result object"
                        );
                        continue;
                    };
                    if let Some(existing) = graph.find(&goal.id(), &key) {
                        // Revisit: record the arrival path, do not re-expand.
                        graph.add_edge(node_id, existing, rule.clone(), query.clone());
                    } else {
                        let new_node = graph.add_node(goal.clone(), found, key, depth + 1);
                        graph.add_edge(node_id, new_node, rule.clone(), query.clone());
                        queue.push_back(new_node);
                    }
                }
            }
        }

        TraversalOutcome {
            graph,
            errors,
            interrupted: None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
