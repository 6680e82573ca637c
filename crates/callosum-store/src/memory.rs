// crates/callosum-store/src/memory.rs
// ============================================================================
// Module: In-Memory Coordination Store
// Description: Single-process CoordinationStore guarded by one mutex.
// Purpose: Back tests, demos, and single-process plugin-mode deployments
// with no durability requirement.
// Dependencies: callosum-core, std::sync
// ============================================================================

//! ## Overview
//! A single `Mutex` guards the journal, lock table, and context records
//! together, matching the data model's requirement that the three
//! collections observe a linearizable ordering relative to each other.
//! Nothing here survives a process restart; use [`crate::file`] when that
//! matters.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

use callosum_core::core::Action;
use callosum_core::core::ContextKey;
use callosum_core::core::ContextRecord;
use callosum_core::core::InstanceId;
use callosum_core::core::JournalEntry;
use callosum_core::core::Lock;
use callosum_core::core::Tier;
use callosum_core::store::Conflict;
use callosum_core::store::CoordinationStore;
use callosum_core::store::StoreError;

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable state guarded by [`InMemoryStore`]'s single mutex.
#[derive(Default)]
struct State {
    /// Append-only journal, in append order.
    journal: Vec<JournalEntry>,
    /// At most one active lock per context key.
    locks: HashMap<ContextKey, Lock>,
    /// Context records per key, newest last.
    records: HashMap<ContextKey, Vec<ContextRecord>>,
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// [`CoordinationStore`] backed entirely by process memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoordinationStore for InMemoryStore {
    fn append_journal(&self, entry: JournalEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.journal.push(entry);
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
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = state.locks.get(context_key) {
            if !existing.is_expired(now_millis) && !existing.is_held_by(instance) {
                return Ok(false);
            }
        }
        state.locks.insert(
            context_key.clone(),
            Lock { instance: instance.clone(), context_key: context_key.clone(), tier, acquired_at: now_millis, expires_at },
        );
        Ok(true)
    }

    fn release_lock(&self, context_key: &ContextKey, instance: &InstanceId) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.locks.get(context_key).is_some_and(|lock| lock.is_held_by(instance)) {
            state.locks.remove(context_key);
        }
        Ok(())
    }

    fn record_context(&self, record: ContextRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.records.entry(record.context_key.clone()).or_default().push(record);
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
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(lock) = state.locks.get(context_key) {
            if !lock.is_expired(now_millis) && !lock.is_held_by(instance) {
                return Ok(Conflict::LockedByOther { holder: lock.instance.clone() });
            }
        }
        if tier.requires_duplicate_check() {
            if let Some(entries) = state.records.get(context_key) {
                for record in entries.iter().rev() {
                    if &record.instance == instance {
                        continue;
                    }
                    if record.is_within_window(now_millis, window_millis) {
                        return Ok(Conflict::RecentOther { instance: record.instance.clone(), timestamp: record.timestamp });
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
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(state
            .journal
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
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(state
            .records
            .get(context_key)
            .and_then(|entries| entries.iter().rev().find(|record| record.is_within_window(now_millis, window_millis)))
            .cloned())
    }

    fn sweep_expired_locks(&self, now_millis: i64) -> Result<usize, StoreError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = state.locks.len();
        state.locks.retain(|_, lock| !lock.is_expired(now_millis));
        Ok(before - state.locks.len())
    }

    fn active_locks(&self, now_millis: i64) -> Result<Vec<Lock>, StoreError> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(state.locks.values().filter(|lock| !lock.is_expired(now_millis)).cloned().collect())
    }

    fn recent_journal(&self, limit: usize) -> Result<Vec<JournalEntry>, StoreError> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let start = state.journal.len().saturating_sub(limit);
        Ok(state.journal[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use callosum_core::core::ContextRecord;
    use callosum_core::core::Tier;

    use super::*;

    fn instance(name: &str) -> InstanceId {
        InstanceId::new(name).expect("non-empty")
    }

    fn key(name: &str) -> ContextKey {
        ContextKey::new(name).expect("non-empty")
    }

    #[test]
    fn acquire_then_release_leaves_no_lock() {
        let store = InMemoryStore::new();
        let alpha = instance("alpha");
        let k = key("email:alice@example.com");
        assert!(store.acquire_lock(&k, &alpha, Tier::Commitment, 0, 1_000).expect("acquires"));
        store.release_lock(&k, &alpha).expect("releases");
        assert!(store.active_locks(0).is_empty());
    }

    #[test]
    fn re_acquiring_by_the_same_instance_refreshes_expiry() {
        let store = InMemoryStore::new();
        let alpha = instance("alpha");
        let k = key("email:alice@example.com");
        assert!(store.acquire_lock(&k, &alpha, Tier::Commitment, 0, 1_000).expect("acquires"));
        assert!(store.acquire_lock(&k, &alpha, Tier::Commitment, 0, 5_000).expect("refreshes"));
        assert_eq!(store.active_locks(0).len(), 1);
        assert_eq!(store.active_locks(0)[0].expires_at, 5_000);
    }

    #[test]
    fn other_instance_cannot_acquire_an_unexpired_lock() {
        let store = InMemoryStore::new();
        let alpha = instance("alpha");
        let beta = instance("beta");
        let k = key("message:channel-delete");
        assert!(store.acquire_lock(&k, &alpha, Tier::Irreversible, 0, 1_000).expect("acquires"));
        assert!(!store.acquire_lock(&k, &beta, Tier::Irreversible, 0, 1_000).expect("contends"));
    }

    #[test]
    fn expired_lock_is_treated_as_absent() {
        let store = InMemoryStore::new();
        let alpha = instance("alpha");
        let beta = instance("beta");
        let k = key("message:channel-delete");
        assert!(store.acquire_lock(&k, &alpha, Tier::Irreversible, 0, 1).expect("acquires"));
        assert!(store.acquire_lock(&k, &beta, Tier::Irreversible, 2, 1_000).expect("expired lock yields"));
    }

    #[test]
    fn check_conflict_never_flags_the_caller_own_activity() {
        let store = InMemoryStore::new();
        let alpha = instance("alpha");
        let k = key("email:alice@example.com");
        store
            .record_context(ContextRecord { instance: alpha.clone(), context_key: k.clone(), tier: Tier::Commitment, timestamp: 0, tool: "exec".to_string() })
            .expect("records");
        let conflict = store.check_conflict(&k, &alpha, Tier::Commitment, 10, 1_000).expect("checks");
        assert_eq!(conflict, Conflict::None);
    }

    #[test]
    fn find_recent_on_key_respects_the_window() {
        let store = InMemoryStore::new();
        let alpha = instance("alpha");
        let k = key("email:alice@example.com");
        let entry = JournalEntry {
            timestamp: 0,
            instance: alpha.clone(),
            tool: "exec".to_string(),
            tier: Tier::Commitment,
            rule_name: callosum_core::core::RuleName::new("email-send"),
            context_key: Some(k.clone()),
            action: Action::Complete,
            params_digest: None,
            conflict_note: None,
        };
        store.append_journal(entry).expect("appends");

        let within = store.find_recent_on_key(&k, &instance("beta"), 500, 1_000, true).expect("scans");
        assert!(within.is_some());

        let outside = store.find_recent_on_key(&k, &instance("beta"), 5_000, 1_000, true).expect("scans");
        assert!(outside.is_none());
    }
}
