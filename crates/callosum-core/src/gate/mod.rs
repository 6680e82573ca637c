// crates/callosum-core/src/gate/mod.rs
// ============================================================================
// Module: Callosum Decision Procedure
// Description: The pre-call and post-call state machine that turns a
// classification plus a coordination-store check into an allow/pause/block
// verdict.
// Purpose: Orchestrate the classifier and the coordination store behind the
// two hook calls a runtime actually makes: before_tool_call/after_tool_call.
// Dependencies: crate::{classifier, core, store}, tracing
// ============================================================================

//! ## Overview
//! [`Gate::before_tool_call`] classifies the call, journals the intercept,
//! and — for tier 2 and above — consults the coordination store before
//! returning allow, pause, or block. The classification made at pre-call
//! time is snapshotted into the returned [`Decision`] and must be threaded
//! back into [`Gate::after_tool_call`] rather than re-derived, so that a
//! mid-flight rule-file reload cannot strand a lock acquired under one rule
//! set while it is released under another. Callers unable to retain that
//! snapshot across their own async boundary can fall back to
//! [`Gate::after_tool_call_reclassify`], which re-derives the
//! classification from the current rule set instead.
//!
//! A pause and a block both refuse the call; the distinction is in how the
//! reason is framed to the caller (pause: "already done, retry if
//! intentional"; block: a hard conflict). Duplicate detection against the
//! calling instance's own recent activity defaults to on
//! ([`DuplicatePolicy::IncludeSelf`]); a deployment that wants to flag only
//! cross-instance races sets [`DuplicatePolicy::OthersOnly`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::classifier::Classification;
use crate::classifier::TierClassifier;
use crate::core::Action;
use crate::core::Clock;
use crate::core::ContextRecord;
use crate::core::InstanceId;
use crate::core::JournalEntry;
use crate::store::Conflict;
use crate::store::CoordinationStore;
use crate::store::StoreError;

/// Default lock lifetime applied when a call has no caller-supplied TTL.
pub const DEFAULT_LOCK_EXPIRY_MILLIS: i64 = 300_000;

/// Default duplicate-detection window applied when a rule has none.
pub const DEFAULT_RECENT_WINDOW_MILLIS: i64 = 3_600_000;

// ============================================================================
// SECTION: Duplicate Policy
// ============================================================================

/// Controls whether a caller's own prior `complete` entry counts as a
/// duplicate in the pre-call self-and-other duplicate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Any instance's recent `complete` entry counts, including the
    /// caller's own.
    #[default]
    IncludeSelf,
    /// Only another instance's recent `complete` entry counts.
    OthersOnly,
}

// ============================================================================
// SECTION: Verdict
// ============================================================================

/// Outcome of [`Gate::before_tool_call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed with the call, with an optional warning noted in the
    /// journal and logs (a tier-3 lock or context-record conflict that did
    /// not rise to a hard block).
    Allow {
        /// Present when a non-blocking conflict was observed.
        warning: Option<String>,
    },
    /// Do not proceed; a recent `complete` on the same context key makes
    /// this call a likely duplicate. Framed to the caller as information,
    /// not a refusal, even though the call does not run.
    Pause {
        /// Human-readable reason, including the prior action and instance.
        reason: String,
    },
    /// Refuse the call outright: a tier-4 lock conflict or lost lock race.
    Block {
        /// Human-readable reason naming the conflicting instance.
        reason: String,
    },
}

impl Verdict {
    /// Returns true when the caller should proceed with the underlying
    /// tool call.
    #[must_use]
    pub const fn permits_call(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

// ============================================================================
// SECTION: Decision
// ============================================================================

/// Snapshot of a pre-call decision, threaded back into
/// [`Gate::after_tool_call`] so post-call handling uses the same
/// classification even if the rule set has since been reloaded.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Verdict returned to the caller.
    pub verdict: Verdict,
    /// Classification made at pre-call time.
    pub classification: Classification,
    /// Instance that made the call.
    pub instance: InstanceId,
    /// Tool name that was classified.
    pub tool: String,
    /// Whether a lock was acquired for this call.
    pub lock_acquired: bool,
}

// ============================================================================
// SECTION: Gate Error
// ============================================================================

/// Error surfaced by the decision procedure.
#[derive(Debug, Error)]
pub enum GateError {
    /// The coordination store rejected an operation. A persistence failure
    /// here is fatal for the current call.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Orchestrates the tier classifier and coordination store across the
/// before/after tool-call hook surface.
pub struct Gate {
    classifier: Arc<TierClassifier>,
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    instance: InstanceId,
    lock_expiry_millis: i64,
    duplicate_policy: DuplicatePolicy,
}

impl Gate {
    /// Builds a gate from its classifier, store, clock, and identity. The
    /// classifier is shared behind an [`Arc`] so that one compiled rule set
    /// can back a [`Gate`] per instance without recompiling it, which is
    /// what a server fielding calls from many instances needs.
    #[must_use]
    pub fn new(
        classifier: Arc<TierClassifier>,
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
        instance: InstanceId,
        lock_expiry_millis: i64,
        duplicate_policy: DuplicatePolicy,
    ) -> Self {
        Self { classifier, store, clock, instance, lock_expiry_millis, duplicate_policy }
    }

    /// Runs the pre-call half of the decision procedure (§4.4).
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the coordination store fails; a
    /// persistence failure here is treated as fatal and the caller should
    /// treat it as a block.
    #[tracing::instrument(skip(self, params), fields(tool, tier))]
    pub fn before_tool_call(&self, tool: &str, params: &Value) -> Result<Decision, GateError> {
        let classification = self.classifier.classify(tool, params);
        tracing::Span::current().record("tier", classification.tier.as_u8());
        let now = self.clock.now_millis();

        self.journal(&classification, tool, Action::Intercept, params, None)?;

        let Some(context_key) = classification.context_key.clone() else {
            return Ok(self.allowed(classification, tool, None, false));
        };

        if classification.tier.requires_context_record() {
            self.store.record_context(ContextRecord {
                instance: self.instance.clone(),
                context_key: context_key.clone(),
                tier: classification.tier,
                timestamp: now,
                tool: tool.to_string(),
            })?;
        }

        if !classification.tier.requires_duplicate_check() {
            return Ok(self.allowed(classification, tool, None, false));
        }

        let window_millis = classification
            .recent_window
            .map_or(DEFAULT_RECENT_WINDOW_MILLIS, |duration| {
                i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
            });
        let include_self = self.duplicate_policy == DuplicatePolicy::IncludeSelf;

        if let Some(recent) = self.store.find_recent_on_key(
            &context_key,
            &self.instance,
            now,
            window_millis,
            include_self,
        )? {
            let reason = format!(
                "context key {context_key} already completed by instance {} at {}; retry only if this action is genuinely distinct",
                recent.instance, recent.timestamp
            );
            self.journal(&classification, tool, Action::Blocked, params, Some(reason.clone()))?;
            return Ok(Decision {
                verdict: Verdict::Pause { reason },
                classification,
                instance: self.instance.clone(),
                tool: tool.to_string(),
                lock_acquired: false,
            });
        }

        let conflict =
            self.store.check_conflict(&context_key, &self.instance, classification.tier, now, window_millis)?;

        if conflict.is_conflict() && classification.tier.hard_blocks_on_conflict() {
            let reason = describe_conflict(&context_key.to_string(), &conflict);
            self.journal(&classification, tool, Action::Blocked, params, Some(reason.clone()))?;
            return Ok(Decision {
                verdict: Verdict::Block { reason },
                classification,
                instance: self.instance.clone(),
                tool: tool.to_string(),
                lock_acquired: false,
            });
        }

        let warning = if conflict.is_conflict() {
            let note = describe_conflict(&context_key.to_string(), &conflict);
            tracing::warn!(context_key = context_key.as_str(), note, "conflict detected, allowing with warning");
            Some(note)
        } else {
            None
        };

        let expires_at = now + self.lock_expiry_millis;
        let acquired =
            self.store.acquire_lock(&context_key, &self.instance, classification.tier, now, expires_at)?;

        if !acquired && classification.tier.hard_blocks_on_conflict() {
            let reason = format!("lock on {context_key} was claimed by another instance first");
            self.journal(&classification, tool, Action::Blocked, params, Some(reason.clone()))?;
            return Ok(Decision {
                verdict: Verdict::Block { reason },
                classification,
                instance: self.instance.clone(),
                tool: tool.to_string(),
                lock_acquired: false,
            });
        }

        if acquired {
            tracing::debug!(context_key = context_key.as_str(), "lock acquired");
        }

        Ok(self.allowed(classification, tool, warning, acquired))
    }

    /// Runs the post-call half of the decision procedure: journals
    /// completion (reusing the pre-call classification snapshot rather than
    /// reclassifying) and releases the lock if one was acquired.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the coordination store fails.
    #[tracing::instrument(skip(self, decision, params), fields(tool = %decision.tool))]
    pub fn after_tool_call(
        &self,
        decision: &Decision,
        params: &Value,
        call_succeeded: bool,
    ) -> Result<(), GateError> {
        let action = if call_succeeded { Action::Complete } else { Action::Failed };
        self.journal(&decision.classification, &decision.tool, action, params, None)?;

        if decision.lock_acquired {
            if let Some(context_key) = &decision.classification.context_key {
                self.store.release_lock(context_key, &decision.instance)?;
                tracing::debug!(context_key = context_key.as_str(), "lock released");
            }
        }
        Ok(())
    }

    /// Runs the post-call half of the decision procedure without a
    /// retained [`Decision`] snapshot, by re-classifying `tool`/`params` as
    /// of now. Kept for callers that cannot carry the pre-call snapshot
    /// across their own async boundary; [`Gate::after_tool_call`] is the
    /// default, since a rule-file reload between the two calls would
    /// otherwise change which context key's lock gets released.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the coordination store fails.
    #[tracing::instrument(skip(self, params), fields(tool))]
    pub fn after_tool_call_reclassify(
        &self,
        tool: &str,
        params: &Value,
        call_succeeded: bool,
    ) -> Result<(), GateError> {
        let classification = self.classifier.classify(tool, params);
        let action = if call_succeeded { Action::Complete } else { Action::Failed };
        self.journal(&classification, tool, action, params, None)?;

        if let Some(context_key) = &classification.context_key {
            if classification.tier.requires_duplicate_check() {
                self.store.release_lock(context_key, &self.instance)?;
                tracing::debug!(context_key = context_key.as_str(), "lock released (reclassified)");
            }
        }
        Ok(())
    }

    /// Builds an `Allow` decision, the common case across every tier.
    fn allowed(
        &self,
        classification: Classification,
        tool: &str,
        warning: Option<String>,
        lock_acquired: bool,
    ) -> Decision {
        Decision {
            verdict: Verdict::Allow { warning },
            classification,
            instance: self.instance.clone(),
            tool: tool.to_string(),
            lock_acquired,
        }
    }

    /// Appends a journal entry for `classification`, digesting `params` and
    /// attaching `conflict_note` when present.
    fn journal(
        &self,
        classification: &Classification,
        tool: &str,
        action: Action,
        params: &Value,
        conflict_note: Option<String>,
    ) -> Result<(), GateError> {
        let entry = JournalEntry {
            timestamp: self.clock.now_millis(),
            instance: self.instance.clone(),
            tool: tool.to_string(),
            tier: classification.tier,
            rule_name: classification.rule_name.clone(),
            context_key: classification.context_key.clone(),
            action,
            params_digest: Some(JournalEntry::digest_params(params)),
            conflict_note,
        };
        self.store.append_journal(entry)?;
        Ok(())
    }
}

/// Renders a human-readable reason for a conflict, naming the conflicting
/// instance and the context key.
fn describe_conflict(context_key: &str, conflict: &Conflict) -> String {
    match conflict {
        Conflict::None => String::new(),
        Conflict::LockedByOther { holder } => {
            format!("active lock on {context_key} held by instance {holder}")
        }
        Conflict::RecentOther { instance, timestamp } => {
            format!("recent action on {context_key} by instance {instance} at {timestamp}")
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::json;

    use super::DuplicatePolicy;
    use super::Gate;
    use super::Verdict;
    use crate::classifier::RuleSpec;
    use crate::classifier::TierClassifier;
    use crate::classifier::ToolPattern;
    use crate::core::Action;
    use crate::core::ContextKey;
    use crate::core::ContextRecord;
    use crate::core::InstanceId;
    use crate::core::JournalEntry;
    use crate::core::Lock;
    use crate::core::ManualClock;
    use crate::core::Tier;
    use crate::store::Conflict;
    use crate::store::CoordinationStore;
    use crate::store::StoreError;

    /// A minimal in-memory store sufficient for gate-level unit tests. The
    /// full filesystem-backed implementation lives in a sibling crate.
    #[derive(Default)]
    struct TestStore {
        journal: Mutex<Vec<JournalEntry>>,
        locks: Mutex<HashMap<ContextKey, Lock>>,
        records: Mutex<HashMap<ContextKey, Vec<ContextRecord>>>,
    }

    impl CoordinationStore for TestStore {
        fn append_journal(&self, entry: JournalEntry) -> Result<(), StoreError> {
            self.journal.lock().unwrap_or_else(|poison| poison.into_inner()).push(entry);
            Ok(())
        }

        fn acquire_lock(
            &self,
            context_key: &ContextKey,
            instance: &InstanceId,
            tier: Tier,
            now_millis: i64,
            expires_at: i64,
        ) -> Result<bool, StoreError> {
            let mut locks = self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
            if let Some(existing) = locks.get(context_key) {
                if !existing.is_expired(now_millis) && !existing.is_held_by(instance) {
                    return Ok(false);
                }
            }
            locks.insert(
                context_key.clone(),
                Lock {
                    instance: instance.clone(),
                    context_key: context_key.clone(),
                    tier,
                    acquired_at: now_millis,
                    expires_at,
                },
            );
            Ok(true)
        }

        fn release_lock(&self, context_key: &ContextKey, instance: &InstanceId) -> Result<(), StoreError> {
            let mut locks = self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
            if locks.get(context_key).is_some_and(|lock| lock.is_held_by(instance)) {
                locks.remove(context_key);
            }
            Ok(())
        }

        fn record_context(&self, record: ContextRecord) -> Result<(), StoreError> {
            self.records
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .entry(record.context_key.clone())
                .or_default()
                .push(record);
            Ok(())
        }

        fn check_conflict(
            &self,
            context_key: &ContextKey,
            instance: &InstanceId,
            tier: Tier,
            now_millis: i64,
            window_millis: i64,
        ) -> Result<Conflict, StoreError> {
            let locks = self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
            if let Some(lock) = locks.get(context_key) {
                if !lock.is_expired(now_millis) && !lock.is_held_by(instance) {
                    return Ok(Conflict::LockedByOther { holder: lock.instance.clone() });
                }
            }
            drop(locks);

            if tier.requires_duplicate_check() {
                let records = self.records.lock().unwrap_or_else(|poison| poison.into_inner());
                if let Some(entries) = records.get(context_key) {
                    for record in entries.iter().rev() {
                        if &record.instance == instance {
                            continue;
                        }
                        if record.is_within_window(now_millis, window_millis) {
                            return Ok(Conflict::RecentOther {
                                instance: record.instance.clone(),
                                timestamp: record.timestamp,
                            });
                        }
                    }
                }
            }
            Ok(Conflict::None)
        }

        fn find_recent_on_key(
            &self,
            context_key: &ContextKey,
            instance: &InstanceId,
            now_millis: i64,
            window_millis: i64,
            include_self: bool,
        ) -> Result<Option<JournalEntry>, StoreError> {
            let journal = self.journal.lock().unwrap_or_else(|poison| poison.into_inner());
            Ok(journal
                .iter()
                .rev()
                .find(|entry| {
                    entry.action == Action::Complete
                        && entry.context_key.as_ref() == Some(context_key)
                        && (include_self || &entry.instance != instance)
                        && now_millis - entry.timestamp <= window_millis
                })
                .cloned())
        }

        fn recent_context(
            &self,
            context_key: &ContextKey,
            now_millis: i64,
            window_millis: i64,
        ) -> Result<Option<ContextRecord>, StoreError> {
            let records = self.records.lock().unwrap_or_else(|poison| poison.into_inner());
            Ok(records
                .get(context_key)
                .and_then(|entries| entries.iter().rev().find(|r| r.is_within_window(now_millis, window_millis)))
                .cloned())
        }

        fn sweep_expired_locks(&self, now_millis: i64) -> Result<usize, StoreError> {
            let mut locks = self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
            let before = locks.len();
            locks.retain(|_, lock| !lock.is_expired(now_millis));
            Ok(before - locks.len())
        }

        fn active_locks(&self, now_millis: i64) -> Result<Vec<Lock>, StoreError> {
            let locks = self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
            Ok(locks.values().filter(|lock| !lock.is_expired(now_millis)).cloned().collect())
        }

        fn recent_journal(&self, limit: usize) -> Result<Vec<JournalEntry>, StoreError> {
            let journal = self.journal.lock().unwrap_or_else(|poison| poison.into_inner());
            let start = journal.len().saturating_sub(limit);
            Ok(journal[start..].to_vec())
        }
    }

    fn email_classifier() -> TierClassifier {
        TierClassifier::compile(vec![RuleSpec {
            name: "email-send".to_string(),
            tier: 3,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: std::collections::BTreeMap::new(),
            command_pattern: Some("--mail-rcpt".to_string()),
            context_key_template: Some("email:{commandRecipient}".to_string()),
            recent_window_ms: None,
        }])
        .expect("rule compiles")
    }

    /// An `email-send` rule with a 10-second duplicate window, far shorter
    /// than [`DEFAULT_RECENT_WINDOW_MILLIS`], to prove a rule's own window
    /// overrides the global default rather than being ignored.
    fn short_window_email_classifier() -> TierClassifier {
        TierClassifier::compile(vec![RuleSpec {
            name: "email-send".to_string(),
            tier: 3,
            tool_pattern: ToolPattern::One("exec".to_string()),
            param_constraints: std::collections::BTreeMap::new(),
            command_pattern: Some("--mail-rcpt".to_string()),
            context_key_template: Some("email:{commandRecipient}".to_string()),
            recent_window_ms: Some(10_000),
        }])
        .expect("rule compiles")
    }

    fn channel_delete_classifier() -> TierClassifier {
        let mut constraints = std::collections::BTreeMap::new();
        constraints.insert(
            "action".to_string(),
            crate::classifier::ParamConstraint::One("channel-delete".to_string()),
        );
        TierClassifier::compile(vec![RuleSpec {
            name: "channel-delete".to_string(),
            tier: 4,
            tool_pattern: ToolPattern::One("message".to_string()),
            param_constraints: constraints,
            command_pattern: None,
            context_key_template: Some("message:channel-delete".to_string()),
            recent_window_ms: None,
        }])
        .expect("rule compiles")
    }

    fn build_gate(
        classifier: TierClassifier,
        instance: &str,
        clock: std::sync::Arc<ManualClock>,
        store: std::sync::Arc<TestStore>,
    ) -> Gate {
        Gate::new(
            std::sync::Arc::new(classifier),
            store,
            clock,
            InstanceId::new(instance).expect("non-empty"),
            300_000,
            DuplicatePolicy::IncludeSelf,
        )
    }

    #[test]
    fn tier_0_call_allows_without_touching_store() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let gate = build_gate(email_classifier(), "alpha", clock, store);
        let decision = gate.before_tool_call("read_file", &json!({})).expect("before succeeds");
        assert_eq!(decision.verdict, Verdict::Allow { warning: None });
        assert!(!decision.lock_acquired);
    }

    #[test]
    fn email_duplicate_self_is_paused_not_blocked() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let gate = build_gate(email_classifier(), "alpha", clock.clone(), store);

        let params = json!({"command": "sendmail --mail-rcpt 'alice@example.com'"});
        let first = gate.before_tool_call("exec", &params).expect("before succeeds");
        assert_eq!(first.verdict, Verdict::Allow { warning: None });
        gate.after_tool_call(&first, &params, true).expect("after succeeds");

        clock.advance(5 * 60 * 1000);
        let second = gate.before_tool_call("exec", &params).expect("before succeeds");
        assert!(matches!(second.verdict, Verdict::Pause { .. }));
    }

    #[test]
    fn a_rules_own_window_overrides_the_global_default_when_shorter() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let gate = build_gate(short_window_email_classifier(), "alpha", clock.clone(), store);

        let params = json!({"command": "sendmail --mail-rcpt 'alice@example.com'"});
        let first = gate.before_tool_call("exec", &params).expect("before succeeds");
        gate.after_tool_call(&first, &params, true).expect("after succeeds");

        // 11s later: outside the rule's own 10s window, even though this is
        // well within DEFAULT_RECENT_WINDOW_MILLIS, so the repeat call must
        // not be treated as a duplicate.
        clock.advance(11_000);
        let second = gate.before_tool_call("exec", &params).expect("before succeeds");
        assert_eq!(second.verdict, Verdict::Allow { warning: None });
    }

    #[test]
    fn tier_3_lock_conflict_between_instances_warns_and_proceeds() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let alpha = build_gate(email_classifier(), "alpha", clock.clone(), store.clone());
        let beta = build_gate(email_classifier(), "beta", clock, store);

        let params = json!({"command": "sendmail --mail-rcpt 'bob@example.com'"});
        let first = alpha.before_tool_call("exec", &params).expect("before succeeds");
        assert!(first.lock_acquired);

        let second = beta.before_tool_call("exec", &params).expect("before succeeds");
        assert!(matches!(second.verdict, Verdict::Allow { warning: Some(_) }));
    }

    #[test]
    fn tier_4_lock_conflict_blocks() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let alpha = build_gate(channel_delete_classifier(), "alpha", clock.clone(), store.clone());
        let beta = build_gate(channel_delete_classifier(), "beta", clock, store);

        let params = json!({"action": "channel-delete"});
        let first = alpha.before_tool_call("message", &params).expect("before succeeds");
        assert!(first.lock_acquired);

        let second = beta.before_tool_call("message", &params).expect("before succeeds");
        assert!(matches!(second.verdict, Verdict::Block { .. }));
    }

    #[test]
    fn different_recipients_do_not_conflict() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let gate = build_gate(email_classifier(), "alpha", clock, store);

        let to_alice = json!({"command": "sendmail --mail-rcpt 'alice@example.com'"});
        let to_bob = json!({"command": "sendmail --mail-rcpt 'bob@example.com'"});
        let first = gate.before_tool_call("exec", &to_alice).expect("before succeeds");
        gate.after_tool_call(&first, &to_alice, true).expect("after succeeds");

        let second = gate.before_tool_call("exec", &to_bob).expect("before succeeds");
        assert_eq!(second.verdict, Verdict::Allow { warning: None });
    }

    #[test]
    fn lock_is_released_after_successful_call() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let gate = build_gate(channel_delete_classifier(), "alpha", clock, store.clone());

        let params = json!({"action": "channel-delete"});
        let decision = gate.before_tool_call("message", &params).expect("before succeeds");
        assert!(decision.lock_acquired);
        gate.after_tool_call(&decision, &params, true).expect("after succeeds");

        assert!(store.locks.lock().expect("not poisoned").is_empty());
    }

    #[test]
    fn after_tool_call_reclassify_releases_the_lock_without_a_retained_decision() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let gate = build_gate(channel_delete_classifier(), "alpha", clock, store.clone());

        let params = json!({"action": "channel-delete"});
        let decision = gate.before_tool_call("message", &params).expect("before succeeds");
        assert!(decision.lock_acquired);

        gate.after_tool_call_reclassify("message", &params, true).expect("reclassified after succeeds");
        assert!(store.locks.lock().expect("not poisoned").is_empty());
    }

    #[test]
    fn expired_lock_permits_a_new_acquisition() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let alpha = Gate::new(
            std::sync::Arc::new(channel_delete_classifier()),
            store.clone(),
            clock.clone(),
            InstanceId::new("alpha").expect("non-empty"),
            1,
            DuplicatePolicy::IncludeSelf,
        );
        let beta = Gate::new(
            std::sync::Arc::new(channel_delete_classifier()),
            store,
            clock.clone(),
            InstanceId::new("beta").expect("non-empty"),
            1,
            DuplicatePolicy::IncludeSelf,
        );

        let params = json!({"action": "channel-delete"});
        let first = alpha.before_tool_call("message", &params).expect("before succeeds");
        assert!(first.lock_acquired);

        clock.advance(2);
        let second = beta.before_tool_call("message", &params).expect("before succeeds");
        assert!(second.lock_acquired);
    }

    #[test]
    fn others_only_policy_ignores_self_duplicates() {
        let clock = std::sync::Arc::new(ManualClock::new(0));
        let store = std::sync::Arc::new(TestStore::default());
        let gate = Gate::new(
            std::sync::Arc::new(email_classifier()),
            store,
            clock.clone(),
            InstanceId::new("alpha").expect("non-empty"),
            300_000,
            DuplicatePolicy::OthersOnly,
        );

        let params = json!({"command": "sendmail --mail-rcpt 'dave@example.com'"});
        let first = gate.before_tool_call("exec", &params).expect("before succeeds");
        gate.after_tool_call(&first, &params, true).expect("after succeeds");

        clock.advance(1_000);
        let second = gate.before_tool_call("exec", &params).expect("before succeeds");
        assert_eq!(second.verdict, Verdict::Allow { warning: None });
    }
}
