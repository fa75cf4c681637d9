//! Targeting rule evaluation.
//!
//! A test applies to a context only when every one of its rules matches.
//! Rules read one scalar from the [`UserContext`]; a missing scalar never
//! matches. Unknown rule types or operators, and `custom` rules without a
//! predicate, also never match.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::{debug_config, should_sample};
use crate::context::UserContext;
use crate::model::Test;

// Rule data

/// Where a rule reads its scalar from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "query-param", alias = "query")]
    QueryParam,
    #[serde(rename = "cookie")]
    Cookie,
    #[serde(rename = "stored-value", alias = "localStorage")]
    StoredValue,
    #[serde(rename = "user-agent", alias = "userAgent")]
    UserAgent,
    #[serde(rename = "custom")]
    Custom,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleType::Url => "url",
            RuleType::QueryParam => "query-param",
            RuleType::Cookie => "cookie",
            RuleType::StoredValue => "stored-value",
            RuleType::UserAgent => "user-agent",
            RuleType::Custom => "custom",
            RuleType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// How the scalar is compared against the rule's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Not,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Equals => "equals",
            Operator::Contains => "contains",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Regex => "regex",
            Operator::Not => "not",
            Operator::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A single value or a list; a list matches when any element does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    One(String),
    Many(Vec<String>),
}

impl RuleValue {
    pub fn values(&self) -> &[String] {
        match self {
            RuleValue::One(v) => std::slice::from_ref(v),
            RuleValue::Many(v) => v,
        }
    }
}

impl Default for RuleValue {
    fn default() -> Self {
        RuleValue::Many(Vec::new())
    }
}

impl From<&str> for RuleValue {
    fn from(s: &str) -> Self {
        RuleValue::One(s.to_string())
    }
}

impl From<String> for RuleValue {
    fn from(s: String) -> Self {
        RuleValue::One(s)
    }
}

impl From<Vec<&str>> for RuleValue {
    fn from(v: Vec<&str>) -> Self {
        RuleValue::Many(v.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for RuleValue {
    fn from(v: Vec<String>) -> Self {
        RuleValue::Many(v)
    }
}

type PredicateFn = dyn Fn(&UserContext) -> anyhow::Result<bool> + Send + Sync;

/// Caller-supplied predicate for `custom` rules. An `Err` counts as a non-match.
#[derive(Clone)]
pub struct CustomPredicate(Arc<PredicateFn>);

impl CustomPredicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&UserContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, context: &UserContext) -> anyhow::Result<bool> {
        (self.0)(context)
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomPredicate")
    }
}

/// One boolean predicate over the subject's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingRule {
    #[serde(rename = "type")]
    pub kind: RuleType,
    pub operator: Operator,
    /// Context entry to read for query-param, cookie and stored-value rules,
    /// or the name of a registered predicate for custom rules. Defaults to
    /// the first element of `value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub value: RuleValue,
    #[serde(skip)]
    pub predicate: Option<CustomPredicate>,
}

impl TargetingRule {
    pub fn new(kind: RuleType, operator: Operator, value: impl Into<RuleValue>) -> Self {
        Self {
            kind,
            operator,
            key: None,
            value: value.into(),
            predicate: None,
        }
    }

    /// A `custom` rule delegating to `f`.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&UserContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            kind: RuleType::Custom,
            operator: Operator::Equals,
            key: None,
            value: RuleValue::default(),
            predicate: Some(CustomPredicate::new(f)),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The context entry this rule reads.
    pub fn lookup_key(&self) -> Option<&str> {
        self.key
            .as_deref()
            .or_else(|| self.value.values().first().map(String::as_str))
    }

    /// Whether the rule can ever match, logging why when it can't.
    pub(crate) fn is_evaluable(&self) -> bool {
        match (self.kind, self.operator) {
            (RuleType::Unknown, _) => false,
            (RuleType::Custom, _) => self.predicate.is_some(),
            (_, Operator::Unknown) => false,
            _ => true,
        }
    }
}

// Evaluation

/// Evaluates targeting rules, caching compiled regex patterns.
#[derive(Debug, Default)]
pub struct TargetingEvaluator {
    // None marks a pattern that failed to compile
    patterns: RwLock<HashMap<String, Option<Regex>>>,
}

impl TargetingEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `context` satisfies every rule of `test` (short-circuiting).
    pub fn matches(&self, test: &Test, context: &UserContext) -> bool {
        let cfg = debug_config();
        let result = test
            .targeting_rules
            .iter()
            .all(|rule| self.evaluate_rule(&test.id, rule, context));

        if cfg.log_match && should_sample(cfg.sample_rate) {
            debug!(
                test_id = %test.id,
                subject_id = %context.subject_id(),
                rules = test.targeting_rules.len(),
                matched = result,
                "targeting evaluated"
            );
        }
        result
    }

    fn evaluate_rule(&self, test_id: &str, rule: &TargetingRule, context: &UserContext) -> bool {
        if !rule.is_evaluable() {
            warn!(
                test_id,
                rule_type = %rule.kind,
                operator = %rule.operator,
                "targeting rule can't be evaluated, treating as non-match"
            );
            return false;
        }

        if rule.kind == RuleType::Custom {
            let Some(predicate) = &rule.predicate else {
                return false;
            };
            return match predicate.call(context) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(test_id, error = %e, "custom targeting predicate failed");
                    false
                }
            };
        }

        let Some(scalar) = read_scalar(rule, context) else {
            return false;
        };
        self.compare(rule.operator, &scalar, rule.value.values())
    }

    fn compare(&self, operator: Operator, scalar: &str, targets: &[String]) -> bool {
        match operator {
            Operator::Equals => targets.iter().any(|t| t == scalar),
            Operator::Contains => targets.iter().any(|t| scalar.contains(t.as_str())),
            Operator::StartsWith => targets.iter().any(|t| scalar.starts_with(t.as_str())),
            Operator::EndsWith => targets.iter().any(|t| scalar.ends_with(t.as_str())),
            Operator::Regex => targets.iter().any(|t| self.regex_matches(t, scalar)),
            Operator::Not => !targets.iter().any(|t| t == scalar),
            Operator::Unknown => false,
        }
    }

    fn regex_matches(&self, pattern: &str, scalar: &str) -> bool {
        {
            let cache = self
                .patterns
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(compiled) = cache.get(pattern) {
                return compiled.as_ref().is_some_and(|re| re.is_match(scalar));
            }
        }

        let compiled = match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern, error = %e, "invalid targeting regex, treating as non-match");
                None
            }
        };
        let matched = compiled.as_ref().is_some_and(|re| re.is_match(scalar));
        self.patterns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pattern.to_string(), compiled);
        matched
    }
}

/// The scalar a rule compares, or `None` when absent from the context.
fn read_scalar(rule: &TargetingRule, context: &UserContext) -> Option<String> {
    match rule.kind {
        RuleType::Url => Some(context.url.clone()),
        RuleType::UserAgent => Some(context.user_agent.clone()),
        RuleType::QueryParam => context.query_params.get(rule.lookup_key()?).cloned(),
        RuleType::Cookie => context.cookies.get(rule.lookup_key()?).cloned(),
        RuleType::StoredValue => stored_scalar(context.stored.get(rule.lookup_key()?)?),
        RuleType::Custom | RuleType::Unknown => None,
    }
}

/// Strings compare as-is, other JSON values by their JSON text. `null` is absent.
fn stored_scalar(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
