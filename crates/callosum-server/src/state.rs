// crates/callosum-server/src/state.rs
// ============================================================================
// Module: Server State
// Description: Shared gate, store, and clock handed to every route handler.
// Purpose: Give handlers the pieces needed to run the decision procedure and
// answer read-only status queries.
// Dependencies: callosum-core
// ============================================================================

//! ## Overview
//! [`callosum_core::gate::Gate`] is bound to one instance at construction,
//! which is exactly right for the in-process hook surface but not for a
//! server fielding calls from many instances at once. [`AppState`] keeps the
//! ingredients a gate is built from — the compiled classifier, the store,
//! the clock, the lock expiry, and the duplicate policy — and hands out one
//! [`Gate`] per instance from a small cache, built lazily and reused across
//! requests from the same instance.
//!
//! [`AppState`] also tracks decisions awaiting a `complete` call, keyed by
//! `(instance, contextKey)` since at most one lock per context key per
//! instance is ever outstanding at a time. A `complete` request over the
//! wire carries only `{ instance, contextKey, result }` — it does not echo
//! back the full classification — so the server looks the pending decision
//! up rather than reclassifying, preserving the same snapshot discipline
//! [`Gate::after_tool_call`] requires in-process.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use callosum_core::classifier::TierClassifier;
use callosum_core::core::Clock;
use callosum_core::core::ContextKey;
use callosum_core::core::InstanceId;
use callosum_core::gate::Decision;
use callosum_core::gate::DuplicatePolicy;
use callosum_core::gate::Gate;
use callosum_core::store::CoordinationStore;

// ============================================================================
// SECTION: App State
// ============================================================================

/// Shared state behind every route handler.
#[derive(Clone)]
pub struct AppState {
    /// Compiled rule set, shared across every per-instance gate.
    classifier: Arc<TierClassifier>,
    /// The coordination store every gate, and the `status`/`journal`/
    /// `lock`/`unlock` handlers, run against.
    pub store: Arc<dyn CoordinationStore>,
    /// The clock every gate runs against.
    pub clock: Arc<dyn Clock>,
    /// Advisory lock lifetime applied by every gate and by explicit `lock`
    /// requests.
    pub lock_expiry_millis: i64,
    /// Duplicate-detection policy applied by every gate.
    duplicate_policy: DuplicatePolicy,
    /// One gate per instance seen so far, built lazily.
    gates: Arc<Mutex<HashMap<InstanceId, Arc<Gate>>>>,
    /// Decisions from `intercept` calls awaiting a matching `complete`.
    pending: Arc<Mutex<HashMap<(InstanceId, ContextKey), Decision>>>,
}

impl AppState {
    /// Builds server state around a shared classifier and the store every
    /// instance's gate will coordinate through.
    #[must_use]
    pub fn new(
        classifier: Arc<TierClassifier>,
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
        lock_expiry_millis: i64,
        duplicate_policy: DuplicatePolicy,
    ) -> Self {
        Self {
            classifier,
            store,
            clock,
            lock_expiry_millis,
            duplicate_policy,
            gates: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the gate for `instance`, building and caching one if this is
    /// its first call.
    pub fn gate_for(&self, instance: &InstanceId) -> Arc<Gate> {
        let mut gates = self.gates.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        gates
            .entry(instance.clone())
            .or_insert_with(|| {
                Arc::new(Gate::new(
                    Arc::clone(&self.classifier),
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                    instance.clone(),
                    self.lock_expiry_millis,
                    self.duplicate_policy,
                ))
            })
            .clone()
    }

    /// Records a pending decision for later retrieval by `complete`, when it
    /// has a context key to key on. Decisions with no context key need no
    /// tracking — `after_tool_call` on those is a pure journal append.
    pub fn track_pending(&self, instance: InstanceId, decision: Decision) {
        if let Some(context_key) = decision.classification.context_key.clone() {
            self.pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert((instance, context_key), decision);
        }
    }

    /// Removes and returns the pending decision for `instance` and
    /// `context_key`, if one was tracked.
    pub fn take_pending(&self, instance: &InstanceId, context_key: &ContextKey) -> Option<Decision> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&(instance.clone(), context_key.clone()))
    }
}
