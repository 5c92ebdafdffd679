//! # Engine
//!
//! The registry composing known domains, their stores, the global rule
//! set, and the merged template helper table.
//!
//! Setup (`add_store`, `add_store_config`, `add_rules`) happens during a
//! single-threaded initialization phase; after that the engine is
//! read-only and may be shared across concurrent traversals. Store setup
//! failures are non-fatal: one misconfigured signal source must not
//! prevent others from working, so every configuration lands in the audit
//! trail with its error recorded.

use crate::follower::Follower;
use crate::graph::RuleGraph;
use crate::rules::{self, RuleDocument};
use crate::types::{
    Appender, Class, ClassId, ClassRef, Domain, DomainRef, Query, RuleRef, SigweaveError, Store,
    StoreConfig, StoreRef, TemplateHelper,
};
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Extract the leading domain token of a query string.
///
/// The token ends at the first `/` or `:`, whichever comes first.
fn leading_domain_token(query: &str) -> Option<&str> {
    let end = query.find(['/', ':'])?;
    if end == 0 { None } else { Some(&query[..end]) }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Composes domains, stores, rules and template helpers for correlation.
#[derive(Default)]
pub struct Engine {
    /// Registered domains, in registration order.
    domains: Vec<DomainRef>,
    /// Domain lookup by name.
    domain_map: BTreeMap<String, DomainRef>,
    /// Stores per domain name, in registration order. First is the default.
    stores: BTreeMap<String, Vec<StoreRef>>,
    /// Store-configuration audit trail: one entry per `add_store_config`
    /// call, failures included.
    store_configs: BTreeMap<String, Vec<StoreConfig>>,
    /// The global rule set, in registration order.
    rules: Vec<RuleRef>,
    /// Merged template helpers contributed by domains and stores.
    template_helpers: BTreeMap<String, TemplateHelper>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("domains", &self.domain_map.keys().collect::<Vec<_>>())
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("rules", &self.rules.len())
            .field(
                "template_helpers",
                &self.template_helpers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Engine {
    /// Create an engine over the given domains, merging each domain's
    /// template helpers.
    #[must_use]
    pub fn new(domains: impl IntoIterator<Item = DomainRef>) -> Self {
        let mut engine = Self::default();
        for domain in domains {
            engine.merge_helpers(domain.template_helpers());
            engine
                .domain_map
                .insert(domain.name().to_string(), domain.clone());
            engine.domains.push(domain);
        }
        engine
    }

    fn merge_helpers(&mut self, helpers: Vec<(String, TemplateHelper)>) {
        for (name, helper) in helpers {
            self.template_helpers.insert(name, helper);
        }
    }

    // -------------------------------------------------------------------------
    // Domains & classes
    // -------------------------------------------------------------------------

    /// The named domain, or `None` if unknown.
    #[must_use]
    pub fn domain(&self, name: &str) -> Option<DomainRef> {
        self.domain_map.get(name).cloned()
    }

    /// All registered domains, in registration order.
    #[must_use]
    pub fn domains(&self) -> &[DomainRef] {
        &self.domains
    }

    fn resolve_domain(&self, name: &str) -> Result<DomainRef, SigweaveError> {
        self.domain(name)
            .ok_or_else(|| SigweaveError::DomainNotFound(name.to_string()))
    }

    /// Resolve a class by domain and class name.
    ///
    /// "Domain not found" and "class not found" are distinguishable
    /// failures.
    pub fn domain_class(&self, domain: &str, class: &str) -> Result<ClassRef, SigweaveError> {
        let resolved = self.resolve_domain(domain)?;
        resolved
            .class(class)
            .ok_or_else(|| SigweaveError::ClassNotFound {
                domain: domain.to_string(),
                class: class.to_string(),
            })
    }

    /// Resolve a qualified `domain/class` name.
    pub fn class(&self, full_name: &str) -> Result<ClassRef, SigweaveError> {
        let id = ClassId::parse(full_name)?;
        self.domain_class(id.domain(), id.class())
    }

    /// Parse a query string via its leading domain token.
    pub fn parse_query(&self, query: &str) -> Result<crate::types::QueryRef, SigweaveError> {
        let domain_name = leading_domain_token(query)
            .ok_or_else(|| SigweaveError::InvalidQuery(query.to_string()))?;
        let domain = self.resolve_domain(domain_name)?;
        domain.parse_query(query)
    }

    // -------------------------------------------------------------------------
    // Stores
    // -------------------------------------------------------------------------

    /// The stores registered for a domain, in registration order.
    #[must_use]
    pub fn stores_for(&self, domain_name: &str) -> &[StoreRef] {
        self.stores.get(domain_name).map_or(&[], Vec::as_slice)
    }

    /// The default (first-registered) store for a domain.
    #[must_use]
    pub fn default_store(&self, domain_name: &str) -> Option<StoreRef> {
        self.stores_for(domain_name).first().cloned()
    }

    /// The audit trail of store configurations for a domain, failed
    /// entries included.
    #[must_use]
    pub fn store_configs_for(&self, domain_name: &str) -> &[StoreConfig] {
        self.store_configs
            .get(domain_name)
            .map_or(&[], Vec::as_slice)
    }

    /// Register a store under its domain's name and merge its template
    /// helpers.
    ///
    /// Fails only on contract violations: the store's domain must be
    /// registered with this engine.
    pub fn add_store(&mut self, store: StoreRef) -> Result<(), SigweaveError> {
        let domain_name = store.domain().name().to_string();
        if !self.domain_map.contains_key(&domain_name) {
            return Err(SigweaveError::DomainNotFound(domain_name));
        }
        self.merge_helpers(store.template_helpers());
        self.stores.entry(domain_name).or_default().push(store);
        Ok(())
    }

    /// Construct a store from a configuration and register it.
    ///
    /// On any failure (unknown domain, construction error, registration
    /// error) the error is recorded into the configuration's `error` key
    /// and the configuration is still appended to the audit trail; the
    /// error is returned but is not fatal to the engine.
    pub fn add_store_config(&mut self, mut config: StoreConfig) -> Result<(), SigweaveError> {
        let domain_name = config.domain().unwrap_or_default().to_string();
        let outcome = self.build_store(&domain_name, &config);
        if let Err(e) = &outcome {
            warn!(domain = %domain_name, error = %e, "store configuration failed");
            config.set_error(e.to_string());
        }
        self.store_configs.entry(domain_name).or_default().push(config);
        outcome
    }

    fn build_store(
        &mut self,
        domain_name: &str,
        config: &StoreConfig,
    ) -> Result<(), SigweaveError> {
        let domain = self.resolve_domain(domain_name)?;
        let store = domain.store(config)?;
        self.add_store(store)
    }

    // -------------------------------------------------------------------------
    // Rules
    // -------------------------------------------------------------------------

    /// The global rule set, in registration order.
    #[must_use]
    pub fn rules(&self) -> &[RuleRef] {
        &self.rules
    }

    /// Append rules to the global rule set.
    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = RuleRef>) {
        self.rules.extend(rules);
    }

    /// Decode a rule document against this engine and append the
    /// resulting rules.
    pub fn add_rule_document(&mut self, doc: &RuleDocument) -> Result<(), SigweaveError> {
        let decoded = rules::decode(doc, self)?;
        self.add_rules(decoded);
        Ok(())
    }

    /// The merged template helper table.
    #[must_use]
    pub fn template_helpers(&self) -> &BTreeMap<String, TemplateHelper> {
        &self.template_helpers
    }

    // -------------------------------------------------------------------------
    // Correlation
    // -------------------------------------------------------------------------

    /// Build a fresh rule graph from the current rule set.
    #[must_use]
    pub fn graph(&self) -> RuleGraph {
        RuleGraph::new(&self.rules)
    }

    /// Start a traversal session bound to this engine and a cancellation
    /// token.
    #[must_use]
    pub fn follower(&self, ctx: CancellationToken) -> Follower<'_> {
        Follower::new(self, ctx)
    }

    /// Execute a query against every store of the class's domain.
    ///
    /// Stores run in registration order against the shared sink; the
    /// first store error aborts the chain (objects appended before the
    /// failure remain in `result`). A domain with zero stores is vacuous
    /// success. Cancellation is checked before each store call.
    pub async fn get(
        &self,
        ctx: &CancellationToken,
        class: &ClassRef,
        query: &dyn Query,
        result: &mut dyn Appender,
    ) -> Result<(), SigweaveError> {
        let domain = class.domain();
        debug!(class = %class.id(), query = %query.query_string(), "get");
        for store in self.stores_for(domain.name()) {
            if ctx.is_cancelled() {
                return Err(SigweaveError::Cancelled);
            }
            store.get(ctx, query, result).await?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDomain, MockStore};
    use crate::result::ListResult;
    use crate::types::DomainRef;

    fn engine() -> Engine {
        let foo: DomainRef = MockDomain::new("foo a b c");
        let bar: DomainRef = MockDomain::new("bar x");
        Engine::new([foo, bar])
    }

    #[test]
    fn domain_lookup_and_order() {
        let engine = engine();
        assert!(engine.domain("foo").is_some());
        assert!(engine.domain("nope").is_none());
        let names: Vec<&str> = engine.domains().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["foo", "bar"]);
    }

    #[test]
    fn class_resolution_distinguishes_failures() {
        let engine = engine();
        assert!(engine.class("foo/a").is_ok());
        assert!(matches!(
            engine.class("nope/a"),
            Err(SigweaveError::DomainNotFound(name)) if name == "nope"
        ));
        assert!(matches!(
            engine.class("foo/nope"),
            Err(SigweaveError::ClassNotFound { .. })
        ));
        assert!(matches!(
            engine.class("unqualified"),
            Err(SigweaveError::InvalidClassName(_))
        ));
    }

    #[test]
    fn parse_query_resolves_leading_domain_token() {
        let engine = engine();
        assert!(engine.parse_query("foo/a?foo/a:x").is_ok());
        assert!(matches!(
            engine.parse_query("nope/a?x"),
            Err(SigweaveError::DomainNotFound(_))
        ));
        assert!(matches!(
            engine.parse_query("no-separator"),
            Err(SigweaveError::InvalidQuery(_))
        ));
    }

    #[test]
    fn add_store_registers_in_order() {
        let mut engine = engine();
        let domain = engine.domain("foo").expect("domain");
        engine
            .add_store(MockStore::for_domain(domain.clone()))
            .expect("add");
        engine
            .add_store(MockStore::for_domain(domain))
            .expect("add");
        assert_eq!(engine.stores_for("foo").len(), 2);
        assert!(engine.default_store("foo").is_some());
        assert!(engine.default_store("bar").is_none());
    }

    #[test]
    fn add_store_config_success_appends_clean_entry() {
        let mut engine = engine();
        engine
            .add_store_config(StoreConfig::for_domain("foo"))
            .expect("config");
        assert_eq!(engine.stores_for("foo").len(), 1);
        let trail = engine.store_configs_for("foo");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].error(), None);
    }

    #[test]
    fn add_store_config_unknown_domain_recorded_not_registered() {
        let mut engine = engine();
        let result = engine.add_store_config(StoreConfig::for_domain("nope"));
        assert!(matches!(result, Err(SigweaveError::DomainNotFound(_))));

        let trail = engine.store_configs_for("nope");
        assert_eq!(trail.len(), 1);
        assert!(trail[0].error().is_some());
        assert!(engine.stores_for("nope").is_empty());
    }

    #[test]
    fn add_store_config_construction_failure_recorded() {
        let mut engine = engine();
        let mut config = StoreConfig::for_domain("foo");
        config.set("fail", "boom");
        let result = engine.add_store_config(config);
        assert!(matches!(result, Err(SigweaveError::StoreConfig(_))));

        let trail = engine.store_configs_for("foo");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].error(), Some("store configuration error: boom"));
        assert!(engine.stores_for("foo").is_empty());
    }

    #[test]
    fn failed_config_does_not_block_later_configs() {
        let mut engine = engine();
        let mut bad = StoreConfig::for_domain("foo");
        bad.set("fail", "boom");
        let _ = engine.add_store_config(bad);
        engine
            .add_store_config(StoreConfig::for_domain("foo"))
            .expect("second config");
        assert_eq!(engine.stores_for("foo").len(), 1);
        assert_eq!(engine.store_configs_for("foo").len(), 2);
    }

    #[tokio::test]
    async fn get_with_zero_stores_is_vacuous_success() {
        let engine = engine();
        let class = engine.class("foo/a").expect("class");
        let query = engine.parse_query("foo/a?foo/a:x").expect("query");
        let mut result = ListResult::new();
        let ctx = CancellationToken::new();
        engine
            .get(&ctx, &class, query.as_ref(), &mut result)
            .await
            .expect("get");
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn get_fails_fast_on_store_error() {
        let mut engine = engine();
        let domain = engine.domain("foo").expect("domain");
        engine
            .add_store(MockStore::failing(domain.clone(), "unreachable"))
            .expect("add");
        engine.add_store(MockStore::for_domain(domain)).expect("add");

        let class = engine.class("foo/a").expect("class");
        let query = engine.parse_query("foo/a?foo/a:x").expect("query");
        let mut result = ListResult::new();
        let ctx = CancellationToken::new();
        let err = engine
            .get(&ctx, &class, query.as_ref(), &mut result)
            .await
            .expect_err("must fail");
        assert_eq!(err, SigweaveError::Store("unreachable".to_string()));
        // The failing store ran first; the healthy one never did.
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn get_observes_cancellation_before_store_calls() {
        let mut engine = engine();
        let domain = engine.domain("foo").expect("domain");
        engine.add_store(MockStore::for_domain(domain)).expect("add");

        let class = engine.class("foo/a").expect("class");
        let query = engine.parse_query("foo/a?foo/a:x").expect("query");
        let mut result = ListResult::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = engine
            .get(&ctx, &class, query.as_ref(), &mut result)
            .await
            .expect_err("must cancel");
        assert_eq!(err, SigweaveError::Cancelled);
        assert!(result.is_empty());
    }
}
