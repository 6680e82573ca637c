// crates/callosum-core/src/template/mod.rs
// ============================================================================
// Module: Callosum Template Resolver
// Description: Pure expansion of context-key templates over (tool, params).
// Purpose: Turn a small template language into a concrete context-key string.
// Dependencies: regex, serde_json
// ============================================================================

//! ## Overview
//! The template language has one construct: `{EXPR}` inside an otherwise
//! literal string. `EXPR` is a `|`-separated list of alternatives evaluated
//! left-to-right; the first alternative to produce a non-empty value wins.
//! Expansion never fails: a malformed template (unbalanced braces) is
//! tolerated by leaving the offending fragment unexpanded, and an `EXPR`
//! whose every alternative fails expands to the literal text `unknown`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Matches `--mail-rcpt '?([^'\s]+)` inside a shell command string.
static MAIL_RCPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"--mail-rcpt '?([^'\s]+)").unwrap_or_else(|err| {
        unreachable!("mail-rcpt pattern is a compile-time constant: {err}")
    })
});

/// Matches `--to '?([^'\s]+)` inside a shell command string.
static TO_FLAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"--to '?([^'\s]+)")
        .unwrap_or_else(|err| unreachable!("--to pattern is a compile-time constant: {err}"))
});

// ============================================================================
// SECTION: Public Entry Point
// ============================================================================

/// Expands `template` against `tool` and `params`, producing a concrete
/// context-key string.
///
/// This function never panics and never returns an error: malformed
/// templates and unresolved alternatives degrade to literal text rather
/// than failing the call, since a bad template is a misconfiguration to
/// surface via a duller context key, not a reason to abort the call.
#[must_use]
pub fn resolve(template: &str, tool: &str, params: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match after_open.find('}') {
            Some(close) => {
                let expr = &after_open[..close];
                out.push_str(&expand_expr(expr, tool, params));
                rest = &after_open[close + 1..];
            }
            None => {
                // Unbalanced open brace: leave the remainder unexpanded.
                out.push_str(rest);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

// ============================================================================
// SECTION: Expression Evaluation
// ============================================================================

/// Evaluates a single `{EXPR}` body, trying each `|`-separated alternative
/// left-to-right until one yields a non-empty value.
fn expand_expr(expr: &str, tool: &str, params: &Value) -> String {
    for alternative in expr.split('|') {
        let alternative = alternative.trim();
        if let Some(value) = eval_alternative(alternative, tool, params) {
            if !value.is_empty() {
                return value;
            }
        }
    }
    "unknown".to_string()
}

/// Evaluates a single alternative form, returning `None` when the
/// alternative does not apply or yields no usable value.
fn eval_alternative(alternative: &str, tool: &str, params: &Value) -> Option<String> {
    match alternative {
        "tool" => Some(tool.to_string()),
        "commandRecipient" => extract_command_recipient(params),
        other => {
            if let Some(name) = other.strip_prefix("params.") {
                param_as_string(params, name)
            } else if other.contains('.') {
                // An unrecognized dotted form: no alternative applies.
                None
            } else {
                // Bare identifier with no recognized special meaning: a
                // literal fallback that always succeeds with its own text.
                Some(other.to_string())
            }
        }
    }
}

/// Reads `params.NAME`, coercing the value to a string. Absent, null, and
/// empty-string values all fail (return `None`) so the next alternative is
/// tried.
fn param_as_string(params: &Value, name: &str) -> Option<String> {
    let value = params.get(name)?;
    match value {
        Value::Null => None,
        Value::String(string) if string.is_empty() => None,
        Value::String(string) => Some(string.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Extracts an email recipient from the `command` parameter, matching, in
/// order, `--mail-rcpt '?([^'\s]+)` then `--to '?([^'\s]+)`.
fn extract_command_recipient(params: &Value) -> Option<String> {
    let command = param_as_string(params, "command")?;
    for regex in [&*MAIL_RCPT_RE, &*TO_FLAG_RE] {
        if let Some(captures) = regex.captures(&command) {
            if let Some(recipient) = captures.get(1) {
                return Some(recipient.as_str().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::resolve;

    #[test]
    fn literal_fallback_always_succeeds() {
        let params = json!({});
        assert_eq!(resolve("{literal}", "exec", &params), "literal");
    }

    #[test]
    fn tool_alternative_uses_tool_name() {
        let params = json!({});
        assert_eq!(resolve("{tool}", "exec", &params), "exec");
    }

    #[test]
    fn params_alternative_coerces_to_string() {
        let params = json!({"recipient": "alice@example.com"});
        assert_eq!(resolve("email:{params.recipient}", "exec", &params), "email:alice@example.com");
    }

    #[test]
    fn first_alternative_wins_left_to_right() {
        let params = json!({"target": "andy"});
        assert_eq!(
            resolve("channel:{params.missing|params.target|tool}", "message", &params),
            "channel:andy"
        );
    }

    #[test]
    fn empty_and_null_params_fall_through() {
        let params = json!({"missing": "", "nullish": null});
        assert_eq!(resolve("{params.missing|params.nullish|fallback}", "exec", &params), "fallback");
    }

    #[test]
    fn unresolved_expression_yields_unknown() {
        let params = json!({});
        assert_eq!(resolve("{params.missing}", "exec", &params), "unknown");
    }

    #[test]
    fn command_recipient_matches_mail_rcpt_then_to() {
        let params = json!({"command": "curl --url 'smtp://host' --mail-rcpt 'alice@example.com' --data x"});
        assert_eq!(
            resolve("email:{commandRecipient}", "exec", &params),
            "email:alice@example.com"
        );

        let params = json!({"command": "mailer --to bob@example.com --subject hi"});
        assert_eq!(resolve("email:{commandRecipient}", "exec", &params), "email:bob@example.com");
    }

    #[test]
    fn unbalanced_brace_is_left_unexpanded() {
        let params = json!({});
        assert_eq!(resolve("email:{params.recipient", "exec", &params), "email:{params.recipient");
    }

    #[test]
    fn multiple_expressions_expand_independently() {
        let params = json!({"a": "x", "b": "y"});
        assert_eq!(resolve("{params.a}-{params.b}", "exec", &params), "x-y");
    }

    #[test]
    fn missing_params_object_behaves_like_empty() {
        let params = json!(null);
        assert_eq!(resolve("{params.anything|fallback}", "exec", &params), "fallback");
    }

    proptest::proptest! {
        /// `resolve` never panics on arbitrary template text and never
        /// produces an empty context key from a non-empty template, since
        /// every expansion path falls back to either the literal text or
        /// `unknown`.
        #[test]
        fn resolve_never_panics_and_is_never_empty_for_a_nonempty_template(
            template in ".{1,40}",
            tool in "[a-z_]{1,12}",
            param_value in "[a-zA-Z0-9 @.!_-]{0,24}",
        ) {
            let params = json!({ "a": param_value, "command": param_value });
            let output = resolve(&template, &tool, &params);
            prop_assert!(!output.is_empty());
        }
    }
}
