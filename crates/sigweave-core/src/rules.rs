//! # Rule Template Compiler
//!
//! Decodes a rule-definition document (named class groups plus rule specs)
//! into concrete, executable correlation rules.
//!
//! Each rule spec names a start class-set, a goal class-set, and a result
//! template. Class tokens are group-expanded, resolved against the engine's
//! domain registry, and the cross product of (start, goal) pairs yields one
//! compiled rule per pair. Templates are compiled at decode time (syntax
//! errors are fatal to the rule and name it) and rendered at apply time
//! (data errors surface per object, never at decode).
//!
//! Template context: the start object under `object`, the active constraint
//! under `constraint`, plus the engine's merged helper table and the
//! built-ins `rfc3339` and `unix` for time formatting.

use crate::engine::Engine;
use crate::groups::{Group, Groups};
use crate::types::{
    Class, ClassId, ClassRef, Constraint, Domain, Object, QueryRef, Rule, RuleRef, SigweaveError,
    TemplateHelper,
};
use chrono::{DateTime, TimeZone, Utc};
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason, ScopedJson,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// DOCUMENT MODEL
// =============================================================================

/// A rule-definition document: named groups plus rule specs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDocument {
    /// Named class groups, usable as tokens in rule class lists.
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Rule specifications.
    pub rules: Vec<RuleSpec>,
}

/// One rule specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Name shared by every rule compiled from this spec.
    pub name: String,
    /// Start class selection.
    pub start: ClassSelector,
    /// Goal class selection.
    pub goal: ClassSelector,
    /// Result templates.
    pub result: ResultTemplate,
}

/// A domain plus a list of class tokens (literals or group names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassSelector {
    /// Domain the classes belong to.
    pub domain: String,
    /// Class tokens; group names are expanded before resolution.
    pub classes: Vec<String>,
}

/// Templates rendered against the start object and active constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultTemplate {
    /// Template producing the goal-domain query string.
    pub query: String,
    /// Optional template naming the produced class; must render to the
    /// rule's goal class.
    #[serde(default)]
    pub class: Option<String>,
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode a YAML rule document against an engine's domain registry.
pub fn decode_yaml(text: &str, engine: &Engine) -> Result<Vec<RuleRef>, SigweaveError> {
    let doc: RuleDocument =
        serde_yaml::from_str(text).map_err(|e| SigweaveError::InvalidDocument(e.to_string()))?;
    decode(&doc, engine)
}

/// Decode a rule document into concrete rules.
///
/// For every rule spec, the start and goal class-token lists are
/// group-expanded, de-duplicated (first occurrence wins), and resolved
/// through the engine. One [`TemplateRule`] is compiled per (start, goal)
/// pair in the cross product. Unresolvable names and template syntax
/// errors are fatal to the decode and name the offending rule.
pub fn decode(doc: &RuleDocument, engine: &Engine) -> Result<Vec<RuleRef>, SigweaveError> {
    let groups = Groups::new(doc.groups.iter().cloned());
    let mut rules: Vec<RuleRef> = Vec::new();
    for spec in &doc.rules {
        let starts = resolve_classes(engine, &groups, spec, &spec.start)?;
        let goals = resolve_classes(engine, &groups, spec, &spec.goal)?;
        for start in &starts {
            for goal in &goals {
                let rule = TemplateRule::compile(
                    &spec.name,
                    start.clone(),
                    goal.clone(),
                    &spec.result,
                    engine.template_helpers(),
                )?;
                rules.push(Arc::new(rule));
            }
        }
    }
    Ok(rules)
}

/// Expand, de-duplicate and resolve one selector's class tokens.
fn resolve_classes(
    engine: &Engine,
    groups: &Groups,
    spec: &RuleSpec,
    selector: &ClassSelector,
) -> Result<Vec<ClassRef>, SigweaveError> {
    let expanded = groups.expand(&selector.classes)?;
    let mut seen = BTreeSet::new();
    let mut classes = Vec::new();
    for name in expanded {
        if !seen.insert(name.clone()) {
            continue;
        }
        let class = engine
            .domain_class(&selector.domain, &name)
            .map_err(|e| SigweaveError::InvalidRule {
                rule: spec.name.clone(),
                detail: e.to_string(),
            })?;
        classes.push(class);
    }
    if classes.is_empty() {
        return Err(SigweaveError::InvalidRule {
            rule: spec.name.clone(),
            detail: "empty class list".to_string(),
        });
    }
    Ok(classes)
}

// =============================================================================
// TEMPLATE RULE
// =============================================================================

const QUERY_TEMPLATE: &str = "query";
const CLASS_TEMPLATE: &str = "class";

/// A concrete rule whose `apply` renders templates against the start
/// object and constraint, then parses the result through the goal domain.
pub struct TemplateRule {
    name: String,
    start: ClassRef,
    goal: ClassRef,
    registry: Handlebars<'static>,
    has_class_template: bool,
}

impl TemplateRule {
    /// Compile one (start, goal) rule from a result template.
    ///
    /// Template syntax is validated here; render failures surface at
    /// apply time.
    pub fn compile(
        name: &str,
        start: ClassRef,
        goal: ClassRef,
        result: &ResultTemplate,
        helpers: &BTreeMap<String, TemplateHelper>,
    ) -> Result<Self, SigweaveError> {
        let mut registry = Handlebars::new();
        // Rendered output is a query string, not HTML.
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("rfc3339", Box::new(Rfc3339Helper));
        registry.register_helper("unix", Box::new(UnixHelper));
        for (helper_name, helper) in helpers {
            registry.register_helper(helper_name, Box::new(SharedHelper(helper.clone())));
        }

        let syntax_error = |e: handlebars::TemplateError| SigweaveError::TemplateSyntax {
            rule: name.to_string(),
            detail: e.to_string(),
        };
        registry
            .register_template_string(QUERY_TEMPLATE, &result.query)
            .map_err(syntax_error)?;
        if let Some(class_template) = &result.class {
            registry
                .register_template_string(CLASS_TEMPLATE, class_template)
                .map_err(syntax_error)?;
        }

        Ok(Self {
            name: name.to_string(),
            start,
            goal,
            registry,
            has_class_template: result.class.is_some(),
        })
    }

    fn render(&self, template: &str, data: &serde_json::Value) -> Result<String, SigweaveError> {
        self.registry
            .render(template, data)
            .map_err(|e| SigweaveError::TemplateRender {
                rule: self.name.clone(),
                detail: e.to_string(),
            })
    }

    /// Verify a rendered class name resolves to this rule's goal class.
    ///
    /// Accepts the bare class name (within the goal domain) or the
    /// qualified `domain/class` form.
    fn check_goal_class(&self, rendered: &str) -> Result<(), SigweaveError> {
        let expected = self.goal.id();
        let actual = if rendered.contains('/') {
            ClassId::parse(rendered)?
        } else {
            ClassId::new(expected.domain(), rendered)
        };
        if actual == expected {
            Ok(())
        } else {
            Err(SigweaveError::TemplateRender {
                rule: self.name.clone(),
                detail: format!("rendered class {actual}, expected {expected}"),
            })
        }
    }
}

impl fmt::Debug for TemplateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRule")
            .field("name", &self.name)
            .field("start", &self.start.id())
            .field("goal", &self.goal.id())
            .finish()
    }
}

impl Rule for TemplateRule {
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
        let data = serde_json::json!({
            "object": object.value(),
            "constraint": constraint.cloned().unwrap_or_default(),
        });
        let query_text = self.render(QUERY_TEMPLATE, &data)?;
        if self.has_class_template {
            let class_text = self.render(CLASS_TEMPLATE, &data)?;
            self.check_goal_class(class_text.trim())?;
        }
        self.goal.domain().parse_query(&query_text)
    }
}

// =============================================================================
// TEMPLATE HELPERS
// =============================================================================

/// Adapter so one shared helper can be registered into many per-rule
/// registries (handlebars takes owned boxes). Delegates both entry
/// points so wrapped helpers work in block and subexpression position.
struct SharedHelper(TemplateHelper);

impl HelperDef for SharedHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        self.0.call_inner(h, r, ctx, rc)
    }

    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        self.0.call(h, r, ctx, rc, out)
    }
}

/// Interpret a template value as a point in time.
///
/// Accepts integer epoch seconds or an RFC 3339 string.
fn parse_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

fn time_param(h: &Helper<'_>, helper_name: &str) -> Result<DateTime<Utc>, RenderErrorReason> {
    let param = h
        .param(0)
        .ok_or_else(|| RenderErrorReason::Other(format!("{helper_name}: missing parameter")))?;
    parse_time(param.value()).ok_or_else(|| {
        RenderErrorReason::Other(format!("{helper_name}: not a timestamp: {}", param.value()))
    })
}

/// Built-in `rfc3339`: format epoch seconds or an RFC 3339 string as
/// RFC 3339.
struct Rfc3339Helper;

impl HelperDef for Rfc3339Helper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let time = time_param(h, "rfc3339")?;
        Ok(ScopedJson::Derived(serde_json::Value::String(time.to_rfc3339())))
    }
}

/// Built-in `unix`: format epoch seconds or an RFC 3339 string as epoch
/// seconds.
struct UnixHelper;

impl HelperDef for UnixHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let time = time_param(h, "unix")?;
        Ok(ScopedJson::Derived(serde_json::Value::from(time.timestamp())))
    }
}

// =============================================================================
// TESTS
// =============================================================================
