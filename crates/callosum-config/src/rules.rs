// crates/callosum-config/src/rules.rs
// ============================================================================
// Module: Callosum Rule File
// Description: Loads tiers.json into a Vec<RuleSpec> ready for compilation.
// Purpose: Let a deployment override the tier classifier without a rebuild,
// while never leaving a gate without a usable classification.
// Dependencies: callosum-core, serde, serde_json
// ============================================================================

//! ## Overview
//! `tiers.json` is a JSON document `{ description?, rules: [...] }`, tested
//! in file order. An absent file is not an error: [`load_rule_specs`] falls
//! back to [`default_rule_specs`], a conservative built-in set covering the
//! common irreversible- and commitment-tier actions. A present-but-malformed
//! file is an error, since silently discarding a deployment's customized
//! rules would be a worse failure mode than refusing to start.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use callosum_core::classifier::ParamConstraint;
use callosum_core::classifier::RuleSpec;
use callosum_core::classifier::ToolPattern;
use serde::Deserialize;

use crate::error::ConfigError;

// ============================================================================
// SECTION: Loading
// ============================================================================

/// The on-disk shape of `tiers.json`: an optional human-readable
/// `description` alongside the `rules` array proper.
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    #[allow(dead_code, reason = "parsed for schema fidelity; not surfaced to callers yet")]
    description: Option<String>,
    rules: Vec<RuleSpec>,
}

/// Loads rule specs from `path`, or [`default_rule_specs`] when `path` is
/// `None` or does not exist.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file exists but cannot be read or is not
/// a valid `{ description?, rules: [...] }` rule document.
pub fn load_rule_specs(path: Option<&Path>) -> Result<Vec<RuleSpec>, ConfigError> {
    let Some(path) = path else {
        return Ok(default_rule_specs());
    };
    if !path.exists() {
        return Ok(default_rule_specs());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
    let file: RuleFile = serde_json::from_str(&content)
        .map_err(|source| ConfigError::Json { path: path.display().to_string(), source })?;
    Ok(file.rules)
}

/// The built-in rule set used when no `tiers.json` is present: tier-4
/// irreversible channel/workspace deletes, tier-3 outbound email and version
/// control pushes, tier-2 message sends, everything else tier 0 or 1 via the
/// structural catch-all injected by
/// [`callosum_core::classifier::TierClassifier::compile`].
#[must_use]
pub fn default_rule_specs() -> Vec<RuleSpec> {
    vec![
        RuleSpec {
            name: "channel-delete".to_string(),
            tier: 4,
            tool_pattern: ToolPattern::One("message".to_string()),
            param_constraints: single_constraint("action", "channel-delete"),
            command_pattern: None,
            context_key_template: Some("message:{params.channel|unknown}".to_string()),
            recent_window_ms: None,
        },
        RuleSpec {
            name: "repository-delete".to_string(),
            tier: 4,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: BTreeMap::new(),
            command_pattern: Some(r"rm\s+-rf\s+\.git".to_string()),
            context_key_template: Some("repository:{params.command}".to_string()),
            recent_window_ms: None,
        },
        RuleSpec {
            name: "email-send".to_string(),
            tier: 3,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: BTreeMap::new(),
            command_pattern: Some("--mail-rcpt".to_string()),
            context_key_template: Some("email:{commandRecipient}".to_string()),
            recent_window_ms: None,
        },
        RuleSpec {
            name: "git-push".to_string(),
            tier: 3,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: BTreeMap::new(),
            command_pattern: Some("git push".to_string()),
            context_key_template: Some("git-push:{params.command}".to_string()),
            recent_window_ms: None,
        },
        RuleSpec {
            name: "message-send".to_string(),
            tier: 2,
            tool_pattern: ToolPattern::One("message".to_string()),
            param_constraints: BTreeMap::new(),
            command_pattern: None,
            context_key_template: Some("channel:{params.channel|unknown}".to_string()),
            recent_window_ms: None,
        },
    ]
}

/// Builds a single-entry parameter constraint map.
fn single_constraint(name: &str, value: &str) -> BTreeMap<String, ParamConstraint> {
    let mut constraints = BTreeMap::new();
    constraints.insert(name.to_string(), ParamConstraint::One(value.to_string()));
    constraints
}
