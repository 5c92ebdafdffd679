//! # sigweave-core
//!
//! The correlation engine for observability signals - THE ENGINE.
//!
//! Sigweave correlates signals (logs, metrics, alerts, cluster resources,
//! traces, ...) that live in heterogeneous, independently-queryable
//! domains. Given a starting signal, it follows declarative rules that
//! transform one object into a query for another domain, executes the
//! query against pluggable stores, and repeats until a caller-specified
//! goal is reached or the search space is exhausted. The output is a
//! navigable correlation graph with provenance, not a flat list.
//!
//! ## Architecture
//!
//! - `types`: the signal model - plugin contracts for domains, classes,
//!   queries, stores and rules
//! - `engine`: the registry composing domains, stores, rules and template
//!   helpers; dispatches queries to stores
//! - `groups`: named, nested class groups for rule authoring
//! - `rules`: the rule-template compiler (documents in, concrete rules out)
//! - `graph`: the class-node / rule-edge multigraph
//! - `follower`: the traversal engine that builds the correlation graph
//!
//! ## Architectural Constraints
//!
//! - The engine depends only on the plugin traits, never on a concrete
//!   signal family
//! - Registries are mutated during single-threaded setup, then read-only
//! - `BTreeMap` only, no `HashMap`: traversal output is deterministic for
//!   a fixed rule set and fixed store responses
//! - A single misconfigured store or failing rule never takes down the
//!   engine or a traversal; failures are captured and returned

// =============================================================================
// MODULES
// =============================================================================

pub mod engine;
pub mod follower;
pub mod graph;
pub mod groups;
pub mod result;
pub mod rules;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// =============================================================================
// RE-EXPORTS: Signal Model (from types module)
// =============================================================================

pub use types::{
    Appender, Class, ClassId, ClassRef, Constraint, Domain, DomainRef, Key, Object, Query,
    QueryRef, Rule, RuleRef, SigweaveError, Store, StoreConfig, StoreRef, TemplateHelper,
};

// =============================================================================
// RE-EXPORTS: Engine & Rules
// =============================================================================

pub use engine::Engine;
pub use groups::{Group, Groups};
pub use result::{DedupResult, ListResult};
pub use rules::{
    ClassSelector, ResultTemplate, RuleDocument, RuleSpec, TemplateRule, decode, decode_yaml,
};

// =============================================================================
// RE-EXPORTS: Rule Graph & Follower
// =============================================================================

pub use follower::{
    CorrelationGraph, EdgeError, Follower, ObjectEdge, ObjectNode, ObjectNodeId, TraversalOptions,
    TraversalOutcome,
};
pub use graph::{EdgeId, NodeId, RuleEdge, RuleGraph};
