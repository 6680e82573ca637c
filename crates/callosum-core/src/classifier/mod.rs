// crates/callosum-core/src/classifier/mod.rs
// ============================================================================
// Module: Callosum Tier Classifier
// Description: Compiles an ordered rule list into a first-match-wins matcher.
// Purpose: Turn a (tool, params) pair into a tier, context key, and rule name.
// Dependencies: crate::{core, template}, regex, serde, serde_json
// ============================================================================

//! ## Overview
//! Rules are tested in declaration order; the first rule whose tool pattern,
//! parameter constraints, and command pattern all match is selected. There is
//! no scoring or specificity sort — user ordering is the contract. The rule
//! list always terminates with a catch-all (tier 0, wildcard tool); a list
//! that lacks one has a terminal default injected at compile time rather
//! than being rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::ContextKey;
use crate::core::RuleName;
use crate::core::Tier;
use crate::core::TierRangeError;
use crate::template;

// ============================================================================
// SECTION: Tool Pattern
// ============================================================================

/// How a rule's tool name is matched against an incoming call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolPattern {
    /// Matches every tool.
    Any(AnyMarker),
    /// Matches a single literal tool name.
    One(String),
    /// Matches any tool name in a finite set.
    Set(Vec<String>),
}

/// Marker type so `"*"` deserializes distinctly from a literal tool named
/// `"*"` would — see [`ToolPattern`]'s `Deserialize` impl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnyMarker;

impl Serialize for AnyMarker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("*")
    }
}

impl<'de> Deserialize<'de> for AnyMarker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        if value == "*" {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom("expected the wildcard tool pattern \"*\""))
        }
    }
}

impl ToolPattern {
    /// Returns true when `tool` matches this pattern.
    #[must_use]
    pub fn matches(&self, tool: &str) -> bool {
        match self {
            Self::Any(AnyMarker) => true,
            Self::One(name) => name == tool,
            Self::Set(names) => names.iter().any(|name| name == tool),
        }
    }
}

// ============================================================================
// SECTION: Rule
// ============================================================================

/// A classifier input, as loaded from the rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Unique rule name, surfaced in journal entries and verdicts.
    pub name: String,
    /// Tier this rule assigns on match.
    pub tier: u8,
    /// Tool name pattern.
    pub tool_pattern: ToolPattern,
    /// Parameter constraints, ALL of which must hold (logical AND).
    #[serde(default)]
    pub param_constraints: BTreeMap<String, ParamConstraint>,
    /// Regular expression the `command` parameter must match, if present
    /// on the rule.
    #[serde(default)]
    pub command_pattern: Option<String>,
    /// Template for deriving this rule's context key.
    #[serde(default)]
    pub context_key_template: Option<String>,
    /// Duplicate-detection window override, in milliseconds.
    #[serde(default)]
    pub recent_window_ms: Option<u64>,
}

/// An allowed value or finite set of allowed values for a parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamConstraint {
    /// A single allowed string value.
    One(String),
    /// A finite set of allowed string values.
    Set(Vec<String>),
}

impl ParamConstraint {
    fn matches(&self, actual: &str) -> bool {
        match self {
            Self::One(value) => value == actual,
            Self::Set(values) => values.iter().any(|value| value == actual),
        }
    }
}

// ============================================================================
// SECTION: Compile Errors
// ============================================================================

/// Error compiling a rule list into a [`TierClassifier`].
#[derive(Debug, Error)]
pub enum ClassifierCompileError {
    /// A rule named an out-of-range tier.
    #[error("rule {name:?}: {source}")]
    TierOutOfRange {
        /// Name of the offending rule.
        name: String,
        /// Underlying range error.
        #[source]
        source: TierRangeError,
    },
    /// A rule's command pattern did not compile as a regular expression.
    #[error("rule {name:?}: invalid command pattern: {source}")]
    InvalidCommandPattern {
        /// Name of the offending rule.
        name: String,
        /// Underlying regex compile error.
        #[source]
        source: Box<regex::Error>,
    },
}

// ============================================================================
// SECTION: Compiled Rule
// ============================================================================

/// A rule compiled once at construction for efficient repeated matching.
struct CompiledRule {
    /// Rule name, surfaced in journal entries and verdicts.
    name: RuleName,
    /// Tier this rule assigns on match.
    tier: Tier,
    /// Tool name pattern.
    tool_pattern: ToolPattern,
    /// Parameter constraints, all of which must hold.
    param_constraints: BTreeMap<String, ParamConstraint>,
    /// Compiled command-pattern regular expression, if any.
    command_pattern: Option<Regex>,
    /// Context-key template, resolved lazily on match.
    context_key_template: Option<String>,
    /// Duplicate-detection window override, if any.
    recent_window: Option<Duration>,
}

impl CompiledRule {
    /// Compiles a single [`RuleSpec`], validating its tier and command
    /// pattern.
    fn compile(spec: RuleSpec) -> Result<Self, ClassifierCompileError> {
        let tier = Tier::try_from(spec.tier).map_err(|source| {
            ClassifierCompileError::TierOutOfRange { name: spec.name.clone(), source }
        })?;
        let command_pattern = spec
            .command_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| ClassifierCompileError::InvalidCommandPattern {
                name: spec.name.clone(),
                source: Box::new(source),
            })?;
        Ok(Self {
            name: RuleName::new(spec.name),
            tier,
            tool_pattern: spec.tool_pattern,
            param_constraints: spec.param_constraints,
            command_pattern,
            context_key_template: spec.context_key_template,
            recent_window: spec.recent_window_ms.map(Duration::from_millis),
        })
    }

    /// Returns true when `tool` and `params` satisfy every predicate on
    /// this rule.
    fn matches(&self, tool: &str, params: &Value) -> bool {
        if !self.tool_pattern.matches(tool) {
            return false;
        }
        for (name, constraint) in &self.param_constraints {
            let Some(actual) = params.get(name).and_then(param_as_str_for_constraint) else {
                return false;
            };
            if !constraint.matches(&actual) {
                return false;
            }
        }
        if let Some(pattern) = &self.command_pattern {
            let command = params.get("command").and_then(Value::as_str).unwrap_or("");
            if !pattern.is_match(command) {
                return false;
            }
        }
        true
    }
}

/// Coerces a JSON value to a string for parameter-constraint comparison.
fn param_as_str_for_constraint(value: &Value) -> Option<String> {
    match value {
        Value::String(string) => Some(string.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// ============================================================================
// SECTION: Classification Output
// ============================================================================

/// Result of classifying a `(tool, params)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Tier assigned by the matching rule.
    pub tier: Tier,
    /// Context key produced by the rule's template, if any.
    pub context_key: Option<ContextKey>,
    /// Name of the rule that matched.
    pub rule_name: RuleName,
    /// Duplicate-detection window override from the rule, if any.
    pub recent_window: Option<Duration>,
}

// ============================================================================
// SECTION: Tier Classifier
// ============================================================================

/// An ordered, compiled rule list that classifies `(tool, params)` pairs.
///
/// # Invariants
/// - The final rule is always a catch-all producing tier 0, either supplied
///   by the caller or injected at compile time.
/// - Matching is first-match-wins in declaration order; there is no scoring.
pub struct TierClassifier {
    rules: Vec<CompiledRule>,
}

impl TierClassifier {
    /// Compiles an ordered rule list into a classifier.
    ///
    /// If `specs` does not end in a structural catch-all (wildcard tool, no
    /// constraints, tier 0), one is appended so every call classifies.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierCompileError`] when a rule names an out-of-range
    /// tier or an invalid command-pattern regular expression.
    pub fn compile(mut specs: Vec<RuleSpec>) -> Result<Self, ClassifierCompileError> {
        if !specs.last().is_some_and(is_structural_catch_all) {
            specs.push(default_catch_all());
        }
        let rules = specs.into_iter().map(CompiledRule::compile).collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// Classifies a `(tool, params)` pair.
    ///
    /// Deterministic and pure: repeated calls with the same rule list and
    /// inputs produce identical output. A `params` value that is missing or
    /// not a JSON object is treated as an empty object.
    #[must_use]
    pub fn classify(&self, tool: &str, params: &Value) -> Classification {
        let empty = Value::Object(serde_json::Map::new());
        let params = if params.is_object() { params } else { &empty };

        for rule in &self.rules {
            if rule.matches(tool, params) {
                let context_key = rule
                    .context_key_template
                    .as_deref()
                    .map(|template| template::resolve(template, tool, params))
                    .and_then(|key| ContextKey::new(key).ok());
                return Classification {
                    tier: rule.tier,
                    context_key,
                    rule_name: rule.name.clone(),
                    recent_window: rule.recent_window,
                };
            }
        }
        unreachable!("compile() guarantees a terminal catch-all rule always matches")
    }
}

/// Returns true when `spec` is already a structural catch-all (wildcard
/// tool, no constraints, tier 0), making an injected one unnecessary.
fn is_structural_catch_all(spec: &RuleSpec) -> bool {
    spec.tier == 0
        && spec.param_constraints.is_empty()
        && spec.command_pattern.is_none()
        && matches!(spec.tool_pattern, ToolPattern::Any(AnyMarker))
}

/// The catch-all rule injected when a compiled rule list has none: tier 0,
/// wildcard tool, no constraints.
fn default_catch_all() -> RuleSpec {
    RuleSpec {
        name: "default-allow".to_string(),
        tier: 0,
        tool_pattern: ToolPattern::Any(AnyMarker),
        param_constraints: BTreeMap::new(),
        command_pattern: None,
        context_key_template: None,
        recent_window_ms: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use serde_json::json;
    use serde_json::Value;

    use super::AnyMarker;
    use super::ParamConstraint;
    use super::RuleSpec;
    use super::TierClassifier;
    use super::ToolPattern;
    use crate::core::Tier;

    fn email_rule() -> RuleSpec {
        RuleSpec {
            name: "email-send".to_string(),
            tier: 3,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: BTreeMap::new(),
            command_pattern: Some("--mail-rcpt".to_string()),
            context_key_template: Some("email:{commandRecipient}".to_string()),
            recent_window_ms: None,
        }
    }

    #[test]
    fn empty_rule_list_still_classifies_via_injected_catch_all() {
        let classifier = TierClassifier::compile(Vec::new()).expect("trivial rule list compiles");
        let result = classifier.classify("anything", &json!({}));
        assert_eq!(result.tier, Tier::Inert);
        assert!(result.context_key.is_none());
    }

    #[test]
    fn first_matching_rule_wins_over_a_later_matching_rule() {
        let specs = vec![
            RuleSpec {
                name: "git-push".to_string(),
                tier: 3,
                tool_pattern: ToolPattern::One("exec".to_string()),
                param_constraints: BTreeMap::new(),
                command_pattern: Some("git push".to_string()),
                context_key_template: Some("git-push".to_string()),
                recent_window_ms: None,
            },
            RuleSpec {
                name: "exec-general".to_string(),
                tier: 1,
                tool_pattern: ToolPattern::One("exec".to_string()),
                param_constraints: BTreeMap::new(),
                command_pattern: None,
                context_key_template: None,
                recent_window_ms: None,
            },
        ];
        let classifier = TierClassifier::compile(specs).expect("rules compile");
        let params = json!({"command": "git push origin main"});
        let result = classifier.classify("exec", &params);
        assert_eq!(result.tier, Tier::Commitment);
        assert_eq!(result.rule_name.as_str(), "git-push");
    }

    #[test]
    fn email_duplicate_scenario_classifies_tier_3_with_recipient_key() {
        let classifier = TierClassifier::compile(vec![email_rule()]).expect("rule compiles");
        let params =
            json!({"command": "curl --url 'smtp://host' --mail-rcpt 'alice@example.com' --data x"});
        let result = classifier.classify("exec", &params);
        assert_eq!(result.tier, Tier::Commitment);
        assert_eq!(result.rule_name.as_str(), "email-send");
        assert_eq!(result.context_key.expect("template resolves").as_str(), "email:alice@example.com");
    }

    #[test]
    fn param_constraints_are_conjunctive() {
        let mut constraints = BTreeMap::new();
        constraints.insert("action".to_string(), ParamConstraint::One("channel-delete".to_string()));
        let specs = vec![RuleSpec {
            name: "irreversible-delete".to_string(),
            tier: 4,
            tool_pattern: ToolPattern::One("message".to_string()),
            param_constraints: constraints,
            command_pattern: None,
            context_key_template: Some("message:channel-delete".to_string()),
            recent_window_ms: None,
        }];
        let classifier = TierClassifier::compile(specs).expect("rule compiles");

        let matching = classifier.classify("message", &json!({"action": "channel-delete"}));
        assert_eq!(matching.tier, Tier::Irreversible);

        let non_matching = classifier.classify("message", &json!({"action": "thread-reply"}));
        assert_eq!(non_matching.tier, Tier::Inert);
    }

    #[test]
    fn wildcard_tool_pattern_matches_every_tool() {
        let specs = vec![RuleSpec {
            name: "catch-some".to_string(),
            tier: 1,
            tool_pattern: ToolPattern::Any(AnyMarker),
            param_constraints: BTreeMap::new(),
            command_pattern: None,
            context_key_template: None,
            recent_window_ms: None,
        }];
        let classifier = TierClassifier::compile(specs).expect("rule compiles");
        assert_eq!(classifier.classify("anything-at-all", &json!({})).tier, Tier::Internal);
    }

    #[test]
    fn missing_or_non_object_params_behave_like_empty_params() {
        let classifier = TierClassifier::compile(vec![email_rule()]).expect("rule compiles");
        let result = classifier.classify("exec", &Value::Null);
        assert_eq!(result.tier, Tier::Inert);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = TierClassifier::compile(vec![email_rule()]).expect("rule compiles");
        let params = json!({"command": "sendmail --mail-rcpt 'bob@example.com'"});
        let first = classifier.classify("exec", &params);
        let second = classifier.classify("exec", &params);
        assert_eq!(first, second);
    }

    proptest::proptest! {
        /// `classify` is a pure function of `(tool, params)`: the same pair
        /// against the same compiled classifier always yields the same
        /// classification, regardless of which rule it happened to match.
        #[test]
        fn classify_is_deterministic_for_any_tool_and_command(
            tool in "[a-z_]{1,12}",
            command in "[a-zA-Z0-9 @.'_-]{0,40}",
        ) {
            let classifier = TierClassifier::compile(vec![email_rule()]).expect("rule compiles");
            let params = json!({"command": command});
            let first = classifier.classify(&tool, &params);
            let second = classifier.classify(&tool, &params);
            prop_assert_eq!(first, second);
        }
    }
}
