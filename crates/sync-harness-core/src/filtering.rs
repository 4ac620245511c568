//! Document filtering engine.
//!
//! A connector's [`FilteringConfig`] holds an ordered list of
//! include/exclude [`FilterRule`]s and an optional advanced configuration
//! that is passed through, uninterpreted, to the connector's native query
//! path. [`active_filter`] turns that configuration into an
//! [`EffectiveFilter`] for one sync run.
//!
//! # Rule evaluation
//!
//! Rules are evaluated in ascending `order` (ties keep insertion order).
//! The first rule whose condition matches the document decides its
//! [`Policy`]. A document no rule matches is included.
//!
//! A rule never aborts a sync: a missing field, a value that cannot be
//! coerced to the type the rule compares against, or an invalid regex all
//! count as "this rule does not match".
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use sync_harness_core::filtering::{EffectiveFilter, FilteringConfig, Policy};
//!
//! let config: FilteringConfig = serde_json::from_value(json!({
//!     "rules": [{
//!         "policy": "exclude",
//!         "field": "url",
//!         "rule": "regex",
//!         "value": ".*/sample/.*\\.pdf",
//!         "order": 0
//!     }],
//!     "advanced_config": null
//! })).unwrap();
//!
//! let filter = EffectiveFilter::from_config(&config);
//! let doc = json!({ "url": "http://x/sample/a.pdf" });
//! assert_eq!(filter.decide(doc.as_object().unwrap()), Policy::Exclude);
//! ```

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::models::{ConnectorSettings, Document};

/// Whether a matching document is indexed or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Include,
    Exclude,
}

/// Condition a rule applies to a document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    #[serde(alias = ">")]
    GreaterThan,
    #[serde(alias = "<")]
    LessThan,
}

/// A single include/exclude rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default)]
    pub id: String,
    pub policy: Policy,
    pub field: String,
    pub rule: RuleKind,
    pub value: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FilterRule {
    pub fn new(
        policy: Policy,
        field: impl Into<String>,
        rule: RuleKind,
        value: impl Into<String>,
        order: i64,
    ) -> Self {
        Self {
            id: String::new(),
            policy,
            field: field.into(),
            rule,
            value: value.into(),
            order,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Filtering configuration owned by a connector.
///
/// Absent and empty inputs are normalized on construction: `null` and `[]`
/// rules both become an empty list, `null` and `{}` advanced configuration
/// both become `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawFilteringConfig")]
pub struct FilteringConfig {
    rules: Vec<FilterRule>,
    advanced_config: Option<Value>,
}

#[derive(Deserialize)]
struct RawFilteringConfig {
    #[serde(default)]
    rules: Option<Vec<FilterRule>>,
    #[serde(default)]
    advanced_config: Option<Value>,
}

impl From<RawFilteringConfig> for FilteringConfig {
    fn from(raw: RawFilteringConfig) -> Self {
        Self::new(raw.rules.unwrap_or_default(), raw.advanced_config)
    }
}

impl FilteringConfig {
    pub fn new(rules: Vec<FilterRule>, advanced_config: Option<Value>) -> Self {
        Self {
            rules,
            advanced_config: advanced_config.filter(|v| !is_empty_value(v)),
        }
    }

    /// Rules in insertion order. Never absent.
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Advanced configuration, or `None` when it was null or empty.
    pub fn advanced_config(&self) -> Option<&Value> {
        self.advanced_config.as_ref()
    }

    /// True when either rules or advanced configuration are present.
    pub fn filtering_present(&self) -> bool {
        !self.rules.is_empty() || self.advanced_config.is_some()
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Compute the filter to apply for one sync of `settings`.
pub fn active_filter(settings: &ConnectorSettings) -> EffectiveFilter {
    EffectiveFilter::from_config(&settings.filtering)
}

/// The filter actually applied to a sync run.
#[derive(Debug, Clone, Default)]
pub enum EffectiveFilter {
    /// No filtering configured: the connector uses its default fetch and
    /// every document is included.
    #[default]
    Unfiltered,
    Filtered {
        advanced_config: Option<Value>,
        rules: Vec<CompiledRule>,
    },
}

impl EffectiveFilter {
    pub fn from_config(config: &FilteringConfig) -> Self {
        if !config.filtering_present() {
            return EffectiveFilter::Unfiltered;
        }

        let mut rules: Vec<CompiledRule> =
            config.rules().iter().cloned().map(CompiledRule::new).collect();
        // Stable sort: equal `order` values keep insertion order.
        rules.sort_by_key(|r| r.rule.order);

        EffectiveFilter::Filtered {
            advanced_config: config.advanced_config().cloned(),
            rules,
        }
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self, EffectiveFilter::Filtered { .. })
    }

    pub fn advanced_config(&self) -> Option<&Value> {
        match self {
            EffectiveFilter::Unfiltered => None,
            EffectiveFilter::Filtered {
                advanced_config, ..
            } => advanced_config.as_ref(),
        }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[CompiledRule] {
        match self {
            EffectiveFilter::Unfiltered => &[],
            EffectiveFilter::Filtered { rules, .. } => rules,
        }
    }

    /// The first rule, in evaluation order, that matches `doc`.
    pub fn matching_rule(&self, doc: &Document) -> Option<&FilterRule> {
        self.rules()
            .iter()
            .find(|r| r.matches(doc))
            .map(|r| &r.rule)
    }

    /// Include/exclude decision for `doc`.
    pub fn decide(&self, doc: &Document) -> Policy {
        self.matching_rule(doc)
            .map(|r| r.policy)
            .unwrap_or(Policy::Include)
    }
}

/// A [`FilterRule`] with its pattern prepared for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: FilterRule,
    regex: Option<Regex>,
}

impl CompiledRule {
    fn new(rule: FilterRule) -> Self {
        let regex = match rule.rule {
            // The pattern must describe the whole value.
            RuleKind::Regex => match Regex::new(&format!("^(?:{})$", rule.value)) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(
                        rule_id = %rule.id,
                        pattern = %rule.value,
                        error = %e,
                        "invalid filtering regex; rule will never match"
                    );
                    None
                }
            },
            _ => None,
        };
        Self { rule, regex }
    }

    pub fn rule(&self) -> &FilterRule {
        &self.rule
    }

    /// Whether this rule's condition holds for `doc`.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(value) = doc.get(&self.rule.field) else {
            return false;
        };
        let expected = self.rule.value.as_str();

        match self.rule.rule {
            RuleKind::Equals => equals(value, expected),
            RuleKind::Contains => as_text(value).is_some_and(|t| t.contains(expected)),
            RuleKind::StartsWith => as_text(value).is_some_and(|t| t.starts_with(expected)),
            RuleKind::EndsWith => as_text(value).is_some_and(|t| t.ends_with(expected)),
            RuleKind::Regex => match (&self.regex, as_text(value)) {
                (Some(re), Some(text)) => re.is_match(&text),
                _ => false,
            },
            RuleKind::GreaterThan => compare(value, expected) == Some(Ordering::Greater),
            RuleKind::LessThan => compare(value, expected) == Some(Ordering::Less),
        }
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn equals(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => match (n.as_f64(), expected.trim().parse::<f64>()) {
            (Some(actual), Ok(wanted)) => actual == wanted,
            _ => false,
        },
        Value::Bool(b) => expected.trim().parse::<bool>().is_ok_and(|wanted| *b == wanted),
        _ => false,
    }
}

/// Order `value` against `expected`, as numbers if both sides parse as
/// numbers, otherwise as RFC 3339 timestamps.
fn compare(value: &Value, expected: &str) -> Option<Ordering> {
    let text = as_text(value)?;

    if let (Ok(actual), Ok(wanted)) = (text.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        return actual.partial_cmp(&wanted);
    }

    let actual = DateTime::parse_from_rfc3339(text.trim()).ok()?;
    let wanted = DateTime::parse_from_rfc3339(expected.trim()).ok()?;
    Some(actual.cmp(&wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn config(rules: Value, advanced_config: Value) -> FilteringConfig {
        serde_json::from_value(json!({
            "rules": rules,
            "advanced_config": advanced_config,
        }))
        .unwrap()
    }

    fn sample_rule() -> Value {
        json!({
            "id": "90owilfksdoifuw",
            "policy": "exclude",
            "field": "url",
            "rule": "regex",
            "value": ".*/sample/.*\\.pdf",
            "order": 0,
            "created_at": "2022-10-10T00:00:00Z",
            "updated_at": "2022-10-10T00:00:00Z"
        })
    }

    fn advanced() -> Value {
        json!({ "find": { "filter": { "$text": { "$search": "garden" } } } })
    }

    #[test]
    fn filtering_present_truth_table() {
        let rules = json!([sample_rule()]);
        let cases = [
            (rules.clone(), advanced(), true),
            (Value::Null, advanced(), true),
            (json!([]), advanced(), true),
            (rules.clone(), json!({}), true),
            (rules.clone(), Value::Null, true),
            (json!([]), json!({}), false),
            (Value::Null, Value::Null, false),
            (json!([]), Value::Null, false),
            (Value::Null, json!({}), false),
        ];
        for (rules, advanced_config, expected) in cases {
            let cfg = config(rules.clone(), advanced_config.clone());
            assert_eq!(
                cfg.filtering_present(),
                expected,
                "rules={} advanced_config={}",
                rules,
                advanced_config
            );
        }
    }

    #[test]
    fn absent_fields_normalize_to_empty() {
        let cfg: FilteringConfig = serde_json::from_value(json!({})).unwrap();
        assert!(cfg.rules().is_empty());
        assert!(cfg.advanced_config().is_none());

        let cfg = config(Value::Null, json!({}));
        assert!(cfg.rules().is_empty());
        assert!(cfg.advanced_config().is_none());
    }

    #[test]
    fn rules_and_advanced_config_are_extracted() {
        let cfg = config(json!([sample_rule()]), advanced());
        assert_eq!(cfg.rules().len(), 1);
        assert_eq!(cfg.rules()[0].id, "90owilfksdoifuw");
        assert_eq!(cfg.rules()[0].policy, Policy::Exclude);
        assert_eq!(cfg.advanced_config(), Some(&advanced()));

        let filter = EffectiveFilter::from_config(&cfg);
        assert!(filter.is_filtered());
        assert_eq!(filter.advanced_config(), Some(&advanced()));
    }

    #[test]
    fn unfiltered_when_nothing_configured() {
        let filter = EffectiveFilter::from_config(&FilteringConfig::default());
        assert!(!filter.is_filtered());
        assert!(filter.rules().is_empty());
        assert_eq!(filter.decide(&doc(json!({"url": "x"}))), Policy::Include);
    }

    #[test]
    fn regex_exclude_matches_sample_pdf() {
        let filter = EffectiveFilter::from_config(&config(json!([sample_rule()]), Value::Null));
        assert_eq!(
            filter.decide(&doc(json!({"url": "http://x/sample/a.pdf"}))),
            Policy::Exclude
        );
    }

    #[test]
    fn unmatched_document_defaults_to_include() {
        let filter = EffectiveFilter::from_config(&config(json!([sample_rule()]), Value::Null));
        let d = doc(json!({"url": "http://x/doc.txt"}));
        assert!(filter.matching_rule(&d).is_none());
        assert_eq!(filter.decide(&d), Policy::Include);
    }

    #[test]
    fn lowest_order_wins_regardless_of_insertion() {
        let rules = vec![
            FilterRule::new(Policy::Include, "title", RuleKind::Contains, "report", 5),
            FilterRule::new(Policy::Exclude, "title", RuleKind::StartsWith, "draft", 1),
        ];
        let filter = EffectiveFilter::from_config(&FilteringConfig::new(rules, None));

        assert_eq!(
            filter.decide(&doc(json!({"title": "draft report"}))),
            Policy::Exclude
        );
        assert_eq!(
            filter.decide(&doc(json!({"title": "final report"}))),
            Policy::Include
        );
    }

    #[test]
    fn equal_order_keeps_insertion_order() {
        let rules = vec![
            FilterRule::new(Policy::Include, "kind", RuleKind::Equals, "a", 0),
            FilterRule::new(Policy::Exclude, "kind", RuleKind::Equals, "a", 0),
        ];
        let filter = EffectiveFilter::from_config(&FilteringConfig::new(rules, None));
        assert_eq!(filter.decide(&doc(json!({"kind": "a"}))), Policy::Include);
    }

    #[test]
    fn coercion_failure_skips_rule() {
        let rules = vec![
            FilterRule::new(Policy::Exclude, "size", RuleKind::GreaterThan, "100", 0),
            FilterRule::new(Policy::Exclude, "size", RuleKind::Equals, "7", 1),
        ];
        let filter = EffectiveFilter::from_config(&FilteringConfig::new(rules, None));

        assert_eq!(filter.decide(&doc(json!({"size": "big"}))), Policy::Include);
        assert_eq!(filter.decide(&doc(json!({"size": [1, 2]}))), Policy::Include);
        assert_eq!(filter.decide(&doc(json!({"other": 1}))), Policy::Include);
        assert_eq!(filter.decide(&doc(json!({"size": 250}))), Policy::Exclude);
        assert_eq!(filter.decide(&doc(json!({"size": "250"}))), Policy::Exclude);
        assert_eq!(filter.decide(&doc(json!({"size": 7.0}))), Policy::Exclude);
    }

    #[test]
    fn timestamps_compare_chronologically() {
        let rules = vec![FilterRule::new(
            Policy::Exclude,
            "updated_at",
            RuleKind::LessThan,
            "2023-01-01T00:00:00Z",
            0,
        )];
        let filter = EffectiveFilter::from_config(&FilteringConfig::new(rules, None));

        assert_eq!(
            filter.decide(&doc(json!({"updated_at": "2022-06-01T12:00:00Z"}))),
            Policy::Exclude
        );
        assert_eq!(
            filter.decide(&doc(json!({"updated_at": "2024-06-01T12:00:00+02:00"}))),
            Policy::Include
        );
    }

    #[test]
    fn invalid_regex_never_matches() {
        let rules = vec![FilterRule::new(Policy::Exclude, "url", RuleKind::Regex, "(", 0)];
        let filter = EffectiveFilter::from_config(&FilteringConfig::new(rules, None));
        assert_eq!(filter.decide(&doc(json!({"url": "("}))), Policy::Include);
    }

    #[test]
    fn symbolic_comparison_aliases_parse() {
        let rule: FilterRule = serde_json::from_value(json!({
            "policy": "include",
            "field": "n",
            "rule": ">",
            "value": "3"
        }))
        .unwrap();
        assert_eq!(rule.rule, RuleKind::GreaterThan);
        assert_eq!(rule.order, 0);
    }
}
