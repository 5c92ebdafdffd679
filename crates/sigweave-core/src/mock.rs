//! # Mock Signal Domain
//!
//! A self-contained signal family for testing the engine, the rule
//! compiler and the follower without any real signal source. Also useful
//! to downstream plugin authors (enable the `mock` feature).
//!
//! Encoding conventions:
//! - a domain is declared from a spec string `"name class1 class2 ..."`;
//!   a domain declared with no classes accepts any class name
//! - objects are JSON strings of the form `domain/class:data`
//! - queries are strings of the form `domain/class?obj1,obj2,...` where
//!   each entry is a full object string; the mock store simply
//!   materializes the objects its query names

use crate::types::{
    Appender, Class, ClassId, ClassRef, Constraint, Domain, DomainRef, Key, Object, Query,
    QueryRef, Rule, RuleRef, SigweaveError, Store, StoreConfig, StoreRef, TemplateHelper,
};
use async_trait::async_trait;
use handlebars::{
    Context, Handlebars, Helper, HelperDef, RenderContext, RenderError, RenderErrorReason,
    ScopedJson,
};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Build a mock object: a JSON string `domain/class:data`.
#[must_use]
pub fn mock_object(class: &ClassId, data: &str) -> Object {
    Object::new(serde_json::json!(format!("{class}:{data}")))
}

// =============================================================================
// DOMAIN
// =============================================================================

/// A mock domain declared from a `"name class1 class2 ..."` spec string.
#[derive(Debug)]
pub struct MockDomain {
    name: String,
    classes: Vec<String>,
    self_ref: Weak<MockDomain>,
}

impl MockDomain {
    /// Declare a domain. With no classes listed, any class name resolves.
    #[must_use]
    pub fn new(spec: &str) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let mut parts = spec.split_whitespace();
            let name = parts.next().unwrap_or_default().to_string();
            Self {
                name,
                classes: parts.map(String::from).collect(),
                self_ref: weak.clone(),
            }
        })
    }

    /// Strong handle to self. Always succeeds while `&self` is reachable,
    /// since the only constructor hands the domain out behind an `Arc`.
    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("mock domain dropped")
    }
}

impl Domain for MockDomain {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self, name: &str) -> Option<ClassRef> {
        if self.classes.is_empty() || self.classes.iter().any(|c| c == name) {
            Some(Arc::new(MockClass {
                name: name.to_string(),
                domain: self.arc(),
            }))
        } else {
            None
        }
    }

    fn classes(&self) -> Vec<ClassRef> {
        self.classes
            .iter()
            .filter_map(|name| self.class(name))
            .collect()
    }

    fn parse_query(&self, query: &str) -> Result<QueryRef, SigweaveError> {
        MockQuery::parse(&self.arc(), query)
    }

    fn store(&self, config: &StoreConfig) -> Result<StoreRef, SigweaveError> {
        // A "fail" key simulates a construction failure.
        if let Some(message) = config.get("fail") {
            return Err(SigweaveError::StoreConfig(message.to_string()));
        }
        Ok(MockStore::for_domain(self.arc()))
    }

    fn template_helpers(&self) -> Vec<(String, TemplateHelper)> {
        vec![
            ("shout".to_string(), Arc::new(ShoutHelper)),
            ("payload".to_string(), Arc::new(PayloadHelper)),
        ]
    }
}

// =============================================================================
// CLASS
// =============================================================================

/// A class of the mock domain. Membership and keys come from the object
/// string's `domain/class:` prefix; the key is the whole object string.
#[derive(Debug)]
pub struct MockClass {
    name: String,
    domain: Arc<MockDomain>,
}

impl Class for MockClass {
    fn domain(&self) -> DomainRef {
        self.domain.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn new_object(&self) -> Object {
        mock_object(&self.id(), "")
    }

    fn contains(&self, object: &Object) -> bool {
        self.key(object).is_some()
    }

    fn key(&self, object: &Object) -> Option<Key> {
        let text = object.value().as_str()?;
        let (class_part, _) = text.split_once(':')?;
        (class_part == self.id().to_string()).then(|| Key::new(text))
    }
}

// =============================================================================
// QUERY
// =============================================================================

/// A mock query: names the class it targets and the objects the store
/// should materialize.
#[derive(Debug)]
pub struct MockQuery {
    class_id: ClassId,
    objects: Vec<String>,
}

impl MockQuery {
    fn parse(domain: &Arc<MockDomain>, query: &str) -> Result<QueryRef, SigweaveError> {
        let (class_part, data_part) = query.split_once('?').unwrap_or((query, ""));
        let class_id = ClassId::parse(class_part)
            .map_err(|_| SigweaveError::InvalidQuery(query.to_string()))?;
        if class_id.domain() != domain.name {
            return Err(SigweaveError::InvalidQuery(query.to_string()));
        }
        if domain.class(class_id.class()).is_none() {
            return Err(SigweaveError::InvalidQuery(query.to_string()));
        }
        let objects = data_part
            .split(',')
            .filter(|entry| !entry.is_empty())
            .map(String::from)
            .collect();
        Ok(Arc::new(Self { class_id, objects }))
    }
}

impl Query for MockQuery {
    fn query_string(&self) -> String {
        format!("{}?{}", self.class_id, self.objects.join(","))
    }

    fn browser_url(&self, base: &Url) -> Result<Url, SigweaveError> {
        base.join(&format!("console/{}", self.class_id))
            .map_err(|e| SigweaveError::InvalidQuery(e.to_string()))
    }

    fn rest_url(&self, base: &Url) -> Result<Url, SigweaveError> {
        base.join(&format!("api/query/{}", self.class_id))
            .map_err(|e| SigweaveError::InvalidQuery(e.to_string()))
    }
}

// =============================================================================
// STORE
// =============================================================================

/// A mock store: materializes the objects its query names, or fails with
/// a fixed error.
#[derive(Debug)]
pub struct MockStore {
    domain: DomainRef,
    fail: Option<String>,
}

impl MockStore {
    /// A healthy store for the domain.
    #[must_use]
    pub fn for_domain(domain: DomainRef) -> StoreRef {
        Arc::new(Self { domain, fail: None })
    }

    /// A store whose every `get` fails with the given message.
    #[must_use]
    pub fn failing(domain: DomainRef, message: &str) -> StoreRef {
        Arc::new(Self {
            domain,
            fail: Some(message.to_string()),
        })
    }
}

#[async_trait]
impl Store for MockStore {
    fn domain(&self) -> DomainRef {
        self.domain.clone()
    }

    async fn get(
        &self,
        _ctx: &CancellationToken,
        query: &dyn Query,
        result: &mut dyn Appender,
    ) -> Result<(), SigweaveError> {
        if let Some(message) = &self.fail {
            return Err(SigweaveError::Store(message.clone()));
        }
        let text = query.query_string();
        let data = text.split_once('?').map_or("", |(_, data)| data);
        let objects = data
            .split(',')
            .filter(|entry| !entry.is_empty())
            .map(|entry| Object::new(serde_json::json!(entry)))
            .collect();
        result.append(objects);
        Ok(())
    }
}

// =============================================================================
// RULE
// =============================================================================

type ApplyFn = dyn Fn(&Object, Option<&Constraint>) -> Result<QueryRef, SigweaveError>
    + Send
    + Sync;

/// A mock rule with a closure-backed `apply`.
pub struct MockRule {
    name: String,
    start: ClassRef,
    goal: ClassRef,
    apply: Box<ApplyFn>,
}

impl MockRule {
    /// Create a rule from explicit classes and an apply closure.
    pub fn new(
        name: &str,
        start: ClassRef,
        goal: ClassRef,
        apply: impl Fn(&Object, Option<&Constraint>) -> Result<QueryRef, SigweaveError>
        + Send
        + Sync
        + 'static,
    ) -> RuleRef {
        Arc::new(Self {
            name: name.to_string(),
            start,
            goal,
            apply: Box::new(apply),
        })
    }

    /// A rule carrying the start object's data payload into one goal
    /// object of the same data.
    #[must_use]
    pub fn forward(name: &str, domain: &DomainRef, start: &str, goal: &str) -> RuleRef {
        let start_class = domain.class(start).expect("start class");
        let goal_class = domain.class(goal).expect("goal class");
        let goal_for_apply = goal_class.clone();
        Self::new(name, start_class, goal_class, move |object, _| {
            let text = object
                .value()
                .as_str()
                .ok_or_else(|| SigweaveError::InvalidQuery("not a mock object".to_string()))?;
            let data = text.split_once(':').map_or(text, |(_, data)| data);
            let goal_id = goal_for_apply.id();
            goal_for_apply
                .domain()
                .parse_query(&format!("{goal_id}?{goal_id}:{data}"))
        })
    }

    /// A rule whose every application fails.
    #[must_use]
    pub fn failing(name: &str, domain: &DomainRef, start: &str, goal: &str) -> RuleRef {
        let start_class = domain.class(start).expect("start class");
        let goal_class = domain.class(goal).expect("goal class");
        let rule_name = name.to_string();
        Self::new(name, start_class, goal_class, move |_, _| {
            Err(SigweaveError::TemplateRender {
                rule: rule_name.clone(),
                detail: "synthetic failure".to_string(),
            })
        })
    }
}

impl fmt::Debug for MockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRule")
            .field("name", &self.name)
            .field("start", &self.start.id())
            .field("goal", &self.goal.id())
            .finish()
    }
}

impl Rule for MockRule {
    fn start(&self) -> ClassRef {
        self.start.clone()
    }

    fn goal(&self) -> ClassRef {
        self.goal.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &self,
        object: &Object,
        constraint: Option<&Constraint>,
    ) -> Result<QueryRef, SigweaveError> {
        (self.apply)(object, constraint)
    }
}

// =============================================================================
// TEMPLATE HELPER
// =============================================================================

/// `shout`: uppercase the first parameter. Exercises the merged
/// domain-contributed helper table.
struct ShoutHelper;

impl HelperDef for ShoutHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let param = h
            .param(0)
            .ok_or_else(|| RenderErrorReason::Other("shout: missing parameter".to_string()))?;
        let rendered = match param.value() {
            serde_json::Value::String(s) => s.to_uppercase(),
            other => other.to_string().to_uppercase(),
        };
        Ok(ScopedJson::Derived(serde_json::Value::String(rendered)))
    }
}

/// `payload`: the data part of a mock object string, after the
/// `domain/class:` prefix.
struct PayloadHelper;

impl HelperDef for PayloadHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let param = h
            .param(0)
            .ok_or_else(|| RenderErrorReason::Other("payload: missing parameter".to_string()))?;
        let text = param.value().as_str().ok_or_else(|| {
            RenderErrorReason::Other(format!("payload: not a mock object: {}", param.value()))
        })?;
        let data = text.split_once(':').map_or(text, |(_, data)| data);
        Ok(ScopedJson::Derived(serde_json::Value::String(data.to_string())))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ListResult;

    #[test]
    fn domain_spec_string_declares_classes() {
        let domain = MockDomain::new("foo a b c");
        assert_eq!(Domain::name(&*domain), "foo");
        assert!(domain.class("a").is_some());
        assert!(domain.class("nope").is_none());
        assert_eq!(domain.classes().len(), 3);
    }

    #[test]
    fn open_domain_accepts_any_class() {
        let domain = MockDomain::new("foo");
        assert!(domain.class("anything").is_some());
        assert!(domain.classes().is_empty());
    }

    #[test]
    fn class_membership_and_key() {
        let domain = MockDomain::new("foo a b");
        let a = domain.class("a").expect("class");
        assert_eq!(a.domain().name(), "foo");
        assert_eq!(a.id().to_string(), "foo/a");

        let member = mock_object(&ClassId::new("foo", "a"), "hello");
        assert!(a.contains(&member));
        assert_eq!(a.key(&member), Some(Key::new("foo/a:hello")));

        let stranger = mock_object(&ClassId::new("foo", "b"), "hello");
        assert!(!a.contains(&stranger));
        assert_eq!(a.key(&stranger), None);
    }

    #[test]
    fn query_parse_and_string_round_trip() {
        let domain = MockDomain::new("foo a");
        let query = domain.parse_query("foo/a?foo/a:x,foo/a:y").expect("parse");
        assert_eq!(query.query_string(), "foo/a?foo/a:x,foo/a:y");

        assert!(domain.parse_query("bar/a?x").is_err());
        assert!(domain.parse_query("foo/nope?x").is_err());
    }

    #[test]
    fn query_urls_are_relative_to_base() {
        let domain = MockDomain::new("foo a");
        let query = domain.parse_query("foo/a?").expect("parse");
        let base = Url::parse("https://console.example/").expect("url");
        assert_eq!(
            query.browser_url(&base).expect("browser").as_str(),
            "https://console.example/console/foo/a"
        );
        assert_eq!(
            query.rest_url(&base).expect("rest").as_str(),
            "https://console.example/api/query/foo/a"
        );
    }

    #[tokio::test]
    async fn store_materializes_query_objects() {
        let domain = MockDomain::new("foo a b");
        let store = MockStore::for_domain(domain.clone());
        let query = domain.parse_query("foo/a?foo/a:x,foo/b:y").expect("parse");

        let mut result = ListResult::new();
        store
            .get(&CancellationToken::new(), query.as_ref(), &mut result)
            .await
            .expect("get");
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn forward_rule_carries_data_to_goal() {
        let domain: DomainRef = MockDomain::new("foo a b");
        let rule = MockRule::forward("fwd", &domain, "a", "b");
        let object = mock_object(&ClassId::new("foo", "a"), "payload");
        let query = rule.apply(&object, None).expect("apply");
        assert_eq!(query.query_string(), "foo/b?foo/b:payload");
    }
}
