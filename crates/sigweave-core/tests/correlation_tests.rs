//! # Correlation Tests
//!
//! End-to-end traversal over a miniature multi-domain setup: cluster
//! workloads, logs and alerts, wired through store configurations and a
//! YAML rule document.

use sigweave_core::mock::{MockDomain, MockStore, mock_object};
use sigweave_core::{
    Class, ClassId, DomainRef, Engine, Rule, SigweaveError, StoreConfig, TraversalOptions,
    decode_yaml,
};
use tokio_util::sync::CancellationToken;

const RULES: &str = r"
groups:
  - name: workloads
    classes: [Pod, Deployment]
rules:
  - name: workload-to-logs
    start: {domain: k8s, classes: [workloads]}
    goal:  {domain: logs, classes: [app]}
    result: {query: 'logs/app?logs/app:{{payload object}}'}
  - name: logs-to-alert
    start: {domain: logs, classes: [app]}
    goal:  {domain: alerts, classes: [alert]}
    result: {query: 'alerts/alert?alerts/alert:{{payload object}}', class: alert}
";

/// Engine with three mock domains, one configured store each, and the
/// rule document above.
fn build_engine() -> Engine {
    let k8s: DomainRef = MockDomain::new("k8s Pod Deployment");
    let logs: DomainRef = MockDomain::new("logs app infra");
    let alerts: DomainRef = MockDomain::new("alerts alert");

    let mut engine = Engine::new([k8s, logs, alerts]);
    for domain in ["k8s", "logs", "alerts"] {
        engine
            .add_store_config(StoreConfig::for_domain(domain))
            .expect("store config");
    }

    let rules = decode_yaml(RULES, &engine).expect("decode rules");
    engine.add_rules(rules);
    engine
}

#[test]
fn rule_document_compiles_to_cross_product() {
    let engine = build_engine();
    // workload-to-logs expands to Pod->app and Deployment->app.
    assert_eq!(engine.rules().len(), 3);

    let graph = engine.graph();
    // Pod, Deployment, app, alert.
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.edge_count(), 3);
}

#[test]
fn qualified_class_names_round_trip() {
    let engine = build_engine();
    let class = engine.class("k8s/Pod").expect("class");
    assert_eq!(class.id().to_string(), "k8s/Pod");
    let again = engine.class(&class.id().to_string()).expect("class");
    assert_eq!(again.id(), class.id());
}

#[tokio::test]
async fn pod_correlates_to_logs_and_alert() {
    let engine = build_engine();
    let pod_class = engine.class("k8s/Pod").expect("class");
    let pod = mock_object(&ClassId::new("k8s", "Pod"), "web-1");

    let follower = engine.follower(CancellationToken::new());
    let outcome = follower
        .follow(vec![(pod_class, pod)], &TraversalOptions::default())
        .await;

    assert!(outcome.errors.is_empty(), "errors: {:?}", outcome.errors);
    assert!(outcome.interrupted.is_none());

    // Pod -> log line -> alert.
    assert_eq!(outcome.graph.node_count(), 3);
    assert_eq!(outcome.graph.edge_count(), 2);

    let rules: Vec<&str> = outcome
        .graph
        .edges()
        .iter()
        .map(|edge| edge.rule.name())
        .collect();
    assert_eq!(rules, vec!["workload-to-logs", "logs-to-alert"]);

    let log_node = outcome
        .graph
        .find(
            &ClassId::new("logs", "app"),
            &sigweave_core::Key::new("logs/app:web-1"),
        )
        .expect("log node");
    assert_eq!(
        outcome.graph.node(log_node).map(|n| n.depth),
        Some(1),
        "log line is one hop from the seed"
    );
}

#[tokio::test]
async fn converging_seeds_share_downstream_nodes() {
    let engine = build_engine();
    let pod_class = engine.class("k8s/Pod").expect("class");
    let deploy_class = engine.class("k8s/Deployment").expect("class");
    let seeds = vec![
        (pod_class, mock_object(&ClassId::new("k8s", "Pod"), "web-1")),
        (
            deploy_class,
            mock_object(&ClassId::new("k8s", "Deployment"), "web-1"),
        ),
    ];

    let follower = engine.follower(CancellationToken::new());
    let outcome = follower.follow(seeds, &TraversalOptions::default()).await;

    assert!(outcome.errors.is_empty());
    // Two seeds, one shared log line, one shared alert.
    assert_eq!(outcome.graph.node_count(), 4);

    let log_nodes = outcome.graph.nodes_of_class(&ClassId::new("logs", "app"));
    assert_eq!(log_nodes.len(), 1, "both seeds reach the same log line");
    let arrivals = outcome
        .graph
        .edges()
        .iter()
        .filter(|edge| edge.to == log_nodes[0])
        .count();
    assert_eq!(arrivals, 2, "both arrival paths are recorded");
    // The shared log line is expanded once, not twice.
    assert_eq!(
        outcome
            .graph
            .nodes_of_class(&ClassId::new("alerts", "alert"))
            .len(),
        1
    );
}

#[tokio::test]
async fn goal_class_bounds_the_walk() {
    let engine = build_engine();
    let pod_class = engine.class("k8s/Pod").expect("class");
    let pod = mock_object(&ClassId::new("k8s", "Pod"), "web-1");

    let follower = engine.follower(CancellationToken::new());
    let options = TraversalOptions {
        goals: vec![ClassId::new("logs", "app")],
        ..TraversalOptions::default()
    };
    let outcome = follower.follow(vec![(pod_class, pod)], &options).await;

    assert_eq!(outcome.graph.node_count(), 2);
    assert!(
        outcome
            .graph
            .nodes_of_class(&ClassId::new("alerts", "alert"))
            .is_empty(),
        "the goal class is reached but not expanded"
    );
}

#[tokio::test]
async fn failing_store_is_a_per_edge_error() {
    let k8s: DomainRef = MockDomain::new("k8s Pod Deployment");
    let logs: DomainRef = MockDomain::new("logs app infra");
    let alerts: DomainRef = MockDomain::new("alerts alert");

    let mut engine = Engine::new([k8s.clone(), logs.clone(), alerts.clone()]);
    engine.add_store(MockStore::for_domain(k8s)).expect("store");
    engine.add_store(MockStore::for_domain(logs)).expect("store");
    engine
        .add_store(MockStore::failing(alerts, "alert store down"))
        .expect("store");
    let rules = decode_yaml(RULES, &engine).expect("decode rules");
    engine.add_rules(rules);

    let pod_class = engine.class("k8s/Pod").expect("class");
    let pod = mock_object(&ClassId::new("k8s", "Pod"), "web-1");
    let follower = engine.follower(CancellationToken::new());
    let outcome = follower
        .follow(vec![(pod_class, pod)], &TraversalOptions::default())
        .await;

    // The log line is still discovered; only the alert hop failed.
    assert_eq!(outcome.graph.node_count(), 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].rule, "logs-to-alert");
    assert_eq!(
        outcome.errors[0].error,
        SigweaveError::Store("alert store down".to_string())
    );
    assert!(outcome.interrupted.is_none());
}

#[test]
fn misconfigured_store_lands_in_audit_trail() {
    let logs: DomainRef = MockDomain::new("logs app");
    let mut engine = Engine::new([logs]);

    let mut bad = StoreConfig::for_domain("logs");
    bad.set("fail", "bad credentials");
    assert!(engine.add_store_config(bad).is_err());
    assert!(
        engine
            .add_store_config(StoreConfig::for_domain("logs"))
            .is_ok(),
        "a failed config must not block later ones"
    );

    let trail = engine.store_configs_for("logs");
    assert_eq!(trail.len(), 2);
    assert!(trail[0].error().is_some());
    assert!(trail[1].error().is_none());
    assert_eq!(engine.stores_for("logs").len(), 1);
}
