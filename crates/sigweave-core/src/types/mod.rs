//! # Signal Model
//!
//! The domain-agnostic interface model that lets arbitrary signal sources
//! plug into the correlation engine:
//!
//! - Plugin contracts (`Domain`, `Class`, `Query`, `Store`, `Rule`)
//! - Opaque signal instances (`Object`) and de-duplication keys (`Key`)
//! - Class identity (`ClassId`) usable as a map key
//! - Time-window constraints (`Constraint`)
//! - Store configuration with failure capture (`StoreConfig`)
//! - Error types (`SigweaveError`)
//!
//! The engine depends only on these traits, never on a concrete signal
//! family. Trait objects are shared as `Arc` handles; implementations must
//! be `Send + Sync` so a fully set-up engine can be read concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Shared handle to a domain plugin.
pub type DomainRef = Arc<dyn Domain>;
/// Shared handle to a class.
pub type ClassRef = Arc<dyn Class>;
/// Shared handle to a query.
pub type QueryRef = Arc<dyn Query>;
/// Shared handle to a store.
pub type StoreRef = Arc<dyn Store>;
/// Shared handle to a rule.
pub type RuleRef = Arc<dyn Rule>;

/// A named template helper contributed by a domain or store.
///
/// Helpers are merged into the engine's function table and made available
/// to every rule template compiled against that engine.
pub type TemplateHelper = Arc<dyn handlebars::HelperDef + Send + Sync>;

// =============================================================================
// OBJECT & KEY
// =============================================================================

/// An opaque instance of a signal.
///
/// The core never interprets an object's structure; only its `Class`'s
/// methods (`contains`, `key`) inspect it. Objects are cheap-to-clone
/// handles: cloning shares the underlying value, and no mutation is
/// expected after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Object(Arc<serde_json::Value>);

impl Object {
    /// Wrap a structured value as a signal instance.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(Arc::new(value))
    }

    /// The underlying structured value.
    #[must_use]
    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Object {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Object::new)
    }
}

/// De-duplication key for an object within its class.
///
/// Keys are stable for the lifetime of the object and unique within the
/// class. `Class::key` returns `None` for objects outside the class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Create a key from any string-like value.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// CLASS IDENTITY
// =============================================================================

/// Value identity of a class: `(domain name, class name)`.
///
/// `ClassId` is ordered and hashable so classes can key `BTreeMap`s and
/// visited sets. The qualified display form is `domain/class`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId {
    domain: String,
    class: String,
}

impl ClassId {
    /// Create an identity from domain and class names.
    #[must_use]
    pub fn new(domain: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            class: class.into(),
        }
    }

    /// Parse a qualified `domain/class` name.
    pub fn parse(full_name: &str) -> Result<Self, SigweaveError> {
        match full_name.split_once('/') {
            Some((domain, class)) if !domain.is_empty() && !class.is_empty() => {
                Ok(Self::new(domain, class))
            }
            _ => Err(SigweaveError::InvalidClassName(full_name.to_string())),
        }
    }

    /// The owning domain's name.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The class name within the domain.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.class)
    }
}

// =============================================================================
// PLUGIN CONTRACTS
// =============================================================================

/// A named family of signal classes (all cluster-resource kinds, all log
/// streams, ...). Identity is the name.
pub trait Domain: fmt::Debug + Send + Sync {
    /// Name of the domain. Unique within an engine.
    fn name(&self) -> &str;

    /// Find a class by name. Returns `None` if unknown.
    fn class(&self, name: &str) -> Option<ClassRef>;

    /// Enumerate the known classes of this domain.
    fn classes(&self) -> Vec<ClassRef>;

    /// Parse a query string into a query for this domain.
    ///
    /// The string is the full canonical form including the leading domain
    /// token; the domain rejects strings it does not understand.
    fn parse_query(&self, query: &str) -> Result<QueryRef, SigweaveError>;

    /// Construct a store from a configuration mapping.
    fn store(&self, config: &StoreConfig) -> Result<StoreRef, SigweaveError>;

    /// Template helpers this domain contributes to rule templates.
    fn template_helpers(&self) -> Vec<(String, TemplateHelper)> {
        Vec::new()
    }
}

/// A subset of objects from one domain sharing a schema.
pub trait Class: fmt::Debug + Send + Sync {
    /// The owning domain.
    fn domain(&self) -> DomainRef;

    /// Name of the class within the domain.
    fn name(&self) -> &str;

    /// Construct an empty instance of this class.
    fn new_object(&self) -> Object;

    /// Membership test.
    fn contains(&self, object: &Object) -> bool;

    /// De-duplication key, or `None` if the object is not a member.
    fn key(&self, object: &Object) -> Option<Key>;

    /// Value identity of this class.
    fn id(&self) -> ClassId {
        ClassId::new(self.domain().name(), self.name())
    }
}

/// A domain-specific request description that a store can execute.
pub trait Query: fmt::Debug + Send + Sync {
    /// Canonical string form. The leading token identifies the domain.
    fn query_string(&self) -> String;

    /// Browser-navigable URL for a console, relative to `base`.
    fn browser_url(&self, base: &Url) -> Result<Url, SigweaveError>;

    /// REST URL relative to `base`.
    fn rest_url(&self, base: &Url) -> Result<Url, SigweaveError>;
}

/// Result sink for `Store::get` calls.
pub trait Appender: Send {
    /// Append retrieved objects to the sink.
    fn append(&mut self, objects: Vec<Object>);
}

/// A pluggable executor of queries for one domain.
///
/// Stores may fail independently of each other (network, permission,
/// parse errors); partial appends before a failure may remain visible in
/// the sink.
#[async_trait]
pub trait Store: fmt::Debug + Send + Sync {
    /// The domain this store serves.
    fn domain(&self) -> DomainRef;

    /// Execute `query`, appending resulting objects to `result`.
    ///
    /// Long-running implementations should watch `ctx` and return
    /// [`SigweaveError::Cancelled`] when it fires.
    async fn get(
        &self,
        ctx: &CancellationToken,
        query: &dyn Query,
        result: &mut dyn Appender,
    ) -> Result<(), SigweaveError>;

    /// Template helpers this store contributes to rule templates.
    fn template_helpers(&self) -> Vec<(String, TemplateHelper)> {
        Vec::new()
    }
}

/// A correlation rule: derives one goal-domain query from one start-domain
/// object under an optional constraint.
///
/// Start and goal classes never change after construction, and `apply` is a
/// pure function of its inputs.
pub trait Rule: fmt::Debug + Send + Sync {
    /// Class of the start object.
    fn start(&self) -> ClassRef;

    /// Class of the desired result objects.
    fn goal(&self) -> ClassRef;

    /// Name of the rule.
    fn name(&self) -> &str;

    /// Apply the rule to a start object, producing a query in the goal
    /// domain.
    fn apply(
        &self,
        object: &Object,
        constraint: Option<&Constraint>,
    ) -> Result<QueryRef, SigweaveError>;
}

// =============================================================================
// CONSTRAINT
// =============================================================================

/// Optional time window narrowing which results a query should admit.
///
/// Immutable once built; the default value is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Include only results timestamped after this time.
    pub start: Option<DateTime<Utc>>,
    /// Include only results timestamped before this time.
    pub end: Option<DateTime<Utc>>,
}

impl Constraint {
    /// Create a constraint with the given bounds.
    #[must_use]
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// True if neither bound is set.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

// =============================================================================
// STORE CONFIGURATION
// =============================================================================

/// Configuration mapping for constructing a store.
///
/// String keys to string values. The `domain` key names the target domain;
/// the `error` key is written by the engine when construction fails, so
/// failed configurations stay inspectable in the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig(BTreeMap<String, String>);

impl StoreConfig {
    /// Reserved key naming the target domain.
    pub const DOMAIN_KEY: &'static str = "domain";
    /// Reserved key carrying the construction error, if any.
    pub const ERROR_KEY: &'static str = "error";

    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration targeting the named domain.
    #[must_use]
    pub fn for_domain(domain: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.set(Self::DOMAIN_KEY, domain.into());
        config
    }

    /// Get a configuration value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// The target domain name, if present.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.get(Self::DOMAIN_KEY)
    }

    /// The recorded construction error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.get(Self::ERROR_KEY)
    }

    /// Record a construction error into this configuration.
    pub fn set_error(&mut self, text: impl Into<String>) {
        self.set(Self::ERROR_KEY, text);
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the correlation engine.
///
/// Cancellation is a dedicated variant so callers can tell "was stopped"
/// apart from "a rule or store failed".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigweaveError {
    /// No domain registered under this name.
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// The domain exists but has no such class.
    #[error("class not found: {class} in domain {domain}")]
    ClassNotFound {
        /// The domain that was searched.
        domain: String,
        /// The missing class name.
        class: String,
    },

    /// A qualified class name could not be split into domain and class.
    #[error("invalid class name: {0}")]
    InvalidClassName(String),

    /// A query string was malformed or rejected by its domain.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A store could not be constructed from its configuration.
    #[error("store configuration error: {0}")]
    StoreConfig(String),

    /// A group references itself, directly or transitively.
    #[error("recursive group definition: {0}")]
    RecursiveGroup(String),

    /// A rule document could not be parsed.
    #[error("invalid rule document: {0}")]
    InvalidDocument(String),

    /// A rule specification failed to decode, e.g. an unresolvable class.
    #[error("rule {rule}: {detail}")]
    InvalidRule {
        /// The offending rule's name.
        rule: String,
        /// Decode detail.
        detail: String,
    },

    /// A rule template failed to compile.
    #[error("rule {rule}: invalid template: {detail}")]
    TemplateSyntax {
        /// The rule whose template is malformed.
        rule: String,
        /// Compiler detail.
        detail: String,
    },

    /// A rule template failed to render for a specific object.
    #[error("rule {rule}: template render failed: {detail}")]
    TemplateRender {
        /// The rule whose template failed.
        rule: String,
        /// Render detail.
        detail: String,
    },

    /// An object was offered to a class it does not belong to.
    #[error("object is not a member of class {0}")]
    NotAMember(ClassId),

    /// A store failed to execute a query.
    #[error("store error: {0}")]
    Store(String),

    /// The traversal was cancelled or timed out.
    #[error("traversal cancelled")]
    Cancelled,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_id_parse_round_trip() {
        let id = ClassId::parse("k8s/Pod").expect("parse");
        assert_eq!(id.domain(), "k8s");
        assert_eq!(id.class(), "Pod");
        assert_eq!(id.to_string(), "k8s/Pod");
    }

    #[test]
    fn class_id_parse_rejects_unqualified_names() {
        assert!(matches!(
            ClassId::parse("Pod"),
            Err(SigweaveError::InvalidClassName(_))
        ));
        assert!(matches!(
            ClassId::parse("/Pod"),
            Err(SigweaveError::InvalidClassName(_))
        ));
        assert!(matches!(
            ClassId::parse("k8s/"),
            Err(SigweaveError::InvalidClassName(_))
        ));
    }

    #[test]
    fn class_id_ordering_is_by_domain_then_class() {
        let mut ids = vec![
            ClassId::new("logs", "infra"),
            ClassId::new("k8s", "Pod"),
            ClassId::new("k8s", "Deployment"),
        ];
        ids.sort();
        assert_eq!(ids[0], ClassId::new("k8s", "Deployment"));
        assert_eq!(ids[2], ClassId::new("logs", "infra"));
    }

    #[test]
    fn object_clone_shares_value() {
        let a = Object::new(serde_json::json!({"name": "web-1"}));
        let b = a.clone();
        assert_eq!(a.value(), b.value());
    }

    #[test]
    fn object_serde_round_trip() {
        let object = Object::new(serde_json::json!({"name": "web-1", "restarts": 3}));
        let text = serde_json::to_string(&object).expect("serialize");
        let back: Object = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(object, back);
    }

    #[test]
    fn constraint_default_is_unconstrained() {
        let constraint = Constraint::default();
        assert!(constraint.is_unconstrained());

        let bounded = Constraint::new(Some(Utc::now()), None);
        assert!(!bounded.is_unconstrained());
    }

    #[test]
    fn store_config_reserved_keys() {
        let mut config = StoreConfig::for_domain("logs");
        assert_eq!(config.domain(), Some("logs"));
        assert_eq!(config.error(), None);

        config.set_error("connection refused");
        assert_eq!(config.error(), Some("connection refused"));
    }
}
