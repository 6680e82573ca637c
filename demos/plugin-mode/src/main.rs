// demos/plugin-mode/src/main.rs
// ============================================================================
// Binary: Callosum Plugin-Mode Demo
// Description: Narrated walkthrough of the gate's end-to-end scenarios.
// Purpose: Show an agent runtime sharing a process with the gate, calling
// Gate::before_tool_call/after_tool_call directly against an in-memory store.
// Dependencies: callosum-core, callosum-store, serde_json
// ============================================================================

//! ## Overview
//! Six scenarios, each a short runtime/gate exchange against a shared
//! [`InMemoryStore`]: a same-instance duplicate pause, a cross-instance race
//! at a tier that only warns, a cross-instance race at a tier that blocks,
//! two calls that do not conflict because their context keys differ, a
//! user-authored rule overriding the generic catch-all, and a lock that
//! expires and frees itself up for a new acquisition. No RPC is involved;
//! this is the deployment shape where the runtime and the gate are the same
//! process.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    reason = "this binary's entire purpose is narrating scenarios to the console"
)]

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;

use callosum_core::classifier::ParamConstraint;
use callosum_core::classifier::RuleSpec;
use callosum_core::classifier::TierClassifier;
use callosum_core::classifier::ToolPattern;
use callosum_core::core::Clock;
use callosum_core::core::InstanceId;
use callosum_core::core::ManualClock;
use callosum_core::gate::Decision;
use callosum_core::gate::DuplicatePolicy;
use callosum_core::gate::Gate;
use callosum_core::gate::Verdict;
use callosum_core::store::CoordinationStore;
use callosum_store::InMemoryStore;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

/// Demo-binary error wrapper, flattening compile and gate errors to a single
/// displayable type so `main` has one place to report failure.
#[derive(Debug, Error)]
#[error("{0}")]
struct DemoError(String);

impl DemoError {
    /// Builds a [`DemoError`] from any displayable error.
    fn new(error: impl std::fmt::Display) -> Self {
        Self(error.to_string())
    }
}

/// Demo result alias for fallible scenario steps.
type DemoResult<T> = Result<T, DemoError>;

/// Demo entry point returning an exit code.
fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            write_stderr_line(&error.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Compiles the demo rule set and walks all six scenarios in order.
fn run() -> DemoResult<()> {
    let classifier = Arc::new(TierClassifier::compile(demo_rule_specs()).map_err(DemoError::new)?);

    write_stdout_line("=== Scenario 1: same-instance duplicate pause ===");
    scenario_duplicate_pause(&classifier)?;

    write_stdout_line("");
    write_stdout_line("=== Scenario 2: cross-instance thread race, tier 2 allows with a warning ===");
    scenario_thread_race(&classifier)?;

    write_stdout_line("");
    write_stdout_line("=== Scenario 3: cross-instance channel-delete race, tier 4 blocks ===");
    scenario_irreversible_race(&classifier)?;

    write_stdout_line("");
    write_stdout_line("=== Scenario 4: different recipients do not conflict ===");
    scenario_no_conflict(&classifier)?;

    write_stdout_line("");
    write_stdout_line("=== Scenario 5: a user rule overrides the generic exec rule ===");
    scenario_classification_override(&classifier)?;

    write_stdout_line("");
    write_stdout_line("=== Scenario 6: an expired lock frees up for a new acquisition ===");
    scenario_lock_expiry(&classifier)?;

    Ok(())
}

/// Demo rule set: one rule per scenario plus the injected catch-all.
///
/// Deliberately not the library's own built-in rule set: the thread-race
/// scenario keys its context on a `target` parameter, not the `channel`
/// parameter the built-in `message-send` rule uses, so a bespoke set keeps
/// the narration matching the scenario text exactly.
fn demo_rule_specs() -> Vec<RuleSpec> {
    vec![
        RuleSpec {
            name: "email-send".to_string(),
            tier: 3,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: std::collections::BTreeMap::new(),
            command_pattern: Some(r"sendmail|--mail-rcpt".to_string()),
            context_key_template: Some("email:{commandRecipient}".to_string()),
            recent_window_ms: Some(3_600_000),
        },
        RuleSpec {
            name: "thread-reply".to_string(),
            tier: 2,
            tool_pattern: ToolPattern::One("message".to_string()),
            param_constraints: std::collections::BTreeMap::new(),
            command_pattern: None,
            context_key_template: Some("channel:{params.target}".to_string()),
            recent_window_ms: None,
        },
        RuleSpec {
            name: "channel-delete".to_string(),
            tier: 4,
            tool_pattern: ToolPattern::One("message".to_string()),
            param_constraints: [("action".to_string(), ParamConstraint::One("channel-delete".to_string()))]
                .into_iter()
                .collect(),
            command_pattern: None,
            context_key_template: Some("channel:{params.target}".to_string()),
            recent_window_ms: None,
        },
        RuleSpec {
            name: "user-exec-override".to_string(),
            tier: 1,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: [("trusted_binary".to_string(), ParamConstraint::One("true".to_string()))]
                .into_iter()
                .collect(),
            command_pattern: None,
            context_key_template: None,
            recent_window_ms: None,
        },
        RuleSpec {
            name: "generic-exec".to_string(),
            tier: 3,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: std::collections::BTreeMap::new(),
            command_pattern: None,
            context_key_template: Some("exec:{tool}".to_string()),
            recent_window_ms: None,
        },
    ]
}

/// Builds a [`Gate`] bound to `instance`, sharing `store` and `clock` with
/// every other instance in the scenario.
fn build_gate(
    classifier: &Arc<TierClassifier>,
    store: &Arc<dyn CoordinationStore>,
    clock: &Arc<dyn Clock>,
    instance: &str,
) -> DemoResult<Gate> {
    let instance = InstanceId::new(instance).map_err(DemoError::new)?;
    Ok(Gate::new(Arc::clone(classifier), Arc::clone(store), Arc::clone(clock), instance, 300_000, DuplicatePolicy::IncludeSelf))
}

/// Instance `alpha` sends an email, completes it, then tries to resend to
/// the same recipient: the second attempt pauses on its own recent history.
fn scenario_duplicate_pause(classifier: &Arc<TierClassifier>) -> DemoResult<()> {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let gate = build_gate(classifier, &store, &clock, "alpha")?;

    let params = email_params("alice@example.com");
    let first = run_gate_call(&gate, &params, "first send")?;
    complete_call(&gate, &first, &params)?;

    let second = gate.before_tool_call("exec", &params).map_err(DemoError::new)?;
    describe("second send (same recipient)", &second.verdict);
    Ok(())
}

/// Instances `alpha` and `beta` both reply into the same thread; tier 2 has
/// no hard block, so the second call is allowed with a logged warning
/// rather than paused or blocked.
fn scenario_thread_race(classifier: &Arc<TierClassifier>) -> DemoResult<()> {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let alpha = build_gate(classifier, &store, &clock, "alpha")?;
    let beta = build_gate(classifier, &store, &clock, "beta")?;

    let params = json!({"target": "andy", "text": "on it"});
    let first = run_gate_call(&alpha, &params, "alpha replies to andy")?;
    let second = run_gate_call(&beta, &params, "beta replies to andy")?;

    complete_call(&alpha, &first, &params)?;
    complete_call(&beta, &second, &params)
}

/// Instances `alpha` and `beta` race to delete the same channel; tier 4
/// hard-blocks on conflict, so whichever call loses the lock race is
/// refused outright.
fn scenario_irreversible_race(classifier: &Arc<TierClassifier>) -> DemoResult<()> {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let alpha = build_gate(classifier, &store, &clock, "alpha")?;
    let beta = build_gate(classifier, &store, &clock, "beta")?;

    let params = json!({"action": "channel-delete", "target": "retired-projects"});
    let first = run_gate_call(&alpha, &params, "alpha deletes retired-projects")?;
    let second = run_gate_call(&beta, &params, "beta deletes retired-projects (loses the race)")?;

    complete_call(&alpha, &first, &params)?;
    if second.verdict.permits_call() {
        complete_call(&beta, &second, &params)?;
    }
    Ok(())
}

/// Two channel deletes against different targets never contend, since their
/// context keys differ.
fn scenario_no_conflict(classifier: &Arc<TierClassifier>) -> DemoResult<()> {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let alpha = build_gate(classifier, &store, &clock, "alpha")?;
    let beta = build_gate(classifier, &store, &clock, "beta")?;

    let alpha_params = json!({"action": "channel-delete", "target": "old-standup-notes"});
    let beta_params = json!({"action": "channel-delete", "target": "archived-rfcs"});

    let alpha_decision = run_gate_call(&alpha, &alpha_params, "alpha deletes old-standup-notes")?;
    let beta_decision = run_gate_call(&beta, &beta_params, "beta deletes archived-rfcs")?;

    complete_call(&alpha, &alpha_decision, &alpha_params)?;
    complete_call(&beta, &beta_decision, &beta_params)
}

/// A trusted-binary exec call matches the earlier, more specific user rule
/// rather than the generic exec rule that would otherwise apply.
fn scenario_classification_override(classifier: &Arc<TierClassifier>) -> DemoResult<()> {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
    let gate = build_gate(classifier, &store, &clock, "alpha")?;

    let params = json!({"trusted_binary": "true", "command": "rg --files"});
    let decision = gate.before_tool_call("exec", &params).map_err(DemoError::new)?;
    write_stdout_line(&format!(
        "rule matched: {} (tier {})",
        decision.classification.rule_name.as_str(),
        decision.classification.tier.as_u8()
    ));
    describe("trusted exec call", &decision.verdict);
    complete_call(&gate, &decision, &params)
}

/// A lock acquired by `alpha` outlives its TTL; once the clock advances past
/// expiry, `beta` can acquire the same context key without contention.
fn scenario_lock_expiry(classifier: &Arc<TierClassifier>) -> DemoResult<()> {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(0));
    let clock_handle: Arc<dyn Clock> = clock.clone();
    let alpha = build_gate(classifier, &store, &clock_handle, "alpha")?;
    let beta = build_gate(classifier, &store, &clock_handle, "beta")?;

    let params = json!({"action": "channel-delete", "target": "stale-channel"});
    let _first = run_gate_call(&alpha, &params, "alpha deletes stale-channel")?;
    write_stdout_line("... alpha never completes the call (crash, simulated) ...");
    write_stdout_line("... clock advances past the lock's TTL ...");
    clock.advance(400_000);

    let second = run_gate_call(&beta, &params, "beta retries stale-channel after the lock expired")?;
    if second.verdict.permits_call() {
        complete_call(&beta, &second, &params)?;
    }
    Ok(())
}

/// Builds the `exec`/`sendmail` parameters for an email scenario.
fn email_params(recipient: &str) -> Value {
    json!({"command": format!("sendmail --mail-rcpt '{recipient}' --data x")})
}

/// Runs `before_tool_call` on `message`/`exec` depending on what the rule
/// set actually matches, narrating the resulting verdict under `label`.
fn run_gate_call(gate: &Gate, params: &Value, label: &str) -> DemoResult<Decision> {
    let tool = if params.get("command").is_some() { "exec" } else { "message" };
    let decision = gate.before_tool_call(tool, params).map_err(DemoError::new)?;
    describe(label, &decision.verdict);
    Ok(decision)
}

/// Runs `after_tool_call` when the call was actually permitted to proceed.
fn complete_call(gate: &Gate, decision: &Decision, params: &Value) -> DemoResult<()> {
    if decision.verdict.permits_call() {
        gate.after_tool_call(decision, params, true).map_err(DemoError::new)?;
    }
    Ok(())
}

/// Narrates a verdict under `label`.
fn describe(label: &str, verdict: &Verdict) {
    let line = match verdict {
        Verdict::Allow { warning: None } => format!("{label}: allow"),
        Verdict::Allow { warning: Some(warning) } => format!("{label}: allow (warning: {warning})"),
        Verdict::Pause { reason } => format!("{label}: pause ({reason})"),
        Verdict::Block { reason } => format!("{label}: block ({reason})"),
    };
    write_stdout_line(&line);
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout, ignoring a write failure (there is
/// nowhere better to report it than the same broken stream).
fn write_stdout_line(message: &str) {
    let mut stdout = std::io::stdout();
    let _ = writeln!(&mut stdout, "{message}");
}

/// Writes a single line to stderr, ignoring a write failure.
fn write_stderr_line(message: &str) {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
}
