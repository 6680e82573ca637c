// crates/callosum-core/tests/coordination_properties.rs
// ============================================================================
// Test: Coordination Store Cross-Cutting Properties
// Description: Lock mutual exclusion, journal monotonicity, round-trip laws,
// and window honesty, exercised against the in-memory store.
// Dependencies: callosum-core, callosum-store, proptest
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Integration tests assert directly on Results rather than propagating them."
)]

use callosum_core::core::Action;
use callosum_core::core::ContextKey;
use callosum_core::core::InstanceId;
use callosum_core::core::JournalEntry;
use callosum_core::core::RuleName;
use callosum_core::core::Tier;
use callosum_core::store::CoordinationStore;
use callosum_store::InMemoryStore;

fn instance(name: &str) -> InstanceId {
    InstanceId::new(name).expect("non-empty instance name")
}

fn key(name: &str) -> ContextKey {
    ContextKey::new(name).expect("non-empty context key")
}

fn complete_entry(instance: &InstanceId, context_key: &ContextKey, timestamp: i64) -> JournalEntry {
    JournalEntry {
        timestamp,
        instance: instance.clone(),
        tool: "exec".to_string(),
        tier: Tier::Commitment,
        rule_name: RuleName::new("email-send"),
        context_key: Some(context_key.clone()),
        action: Action::Complete,
        params_digest: None,
        conflict_note: None,
    }
}

#[test]
fn acquire_then_release_restores_the_lock_table_to_its_pre_state() {
    let store = InMemoryStore::new();
    let alpha = instance("alpha");
    let k = key("email:alice@example.com");

    let before = store.active_locks(0).expect("reads");
    assert!(before.is_empty());

    assert!(store.acquire_lock(&k, &alpha, Tier::Commitment, 0, 1_000).expect("acquires"));
    store.release_lock(&k, &alpha).expect("releases");

    let after = store.active_locks(0).expect("reads");
    assert_eq!(after, before);
}

#[test]
fn a_second_acquire_by_the_same_instance_refreshes_expiry_without_duplicating_the_lock() {
    let store = InMemoryStore::new();
    let alpha = instance("alpha");
    let k = key("message:channel-delete");

    assert!(store.acquire_lock(&k, &alpha, Tier::Irreversible, 0, 1_000).expect("first acquire"));
    assert!(store.acquire_lock(&k, &alpha, Tier::Irreversible, 500, 2_000).expect("second acquire"));

    let locks = store.active_locks(0).expect("reads");
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].expires_at, 2_000);
}

#[test]
fn at_most_one_instance_holds_the_lock_across_an_interleaved_sequence() {
    let store = InMemoryStore::new();
    let alpha = instance("alpha");
    let beta = instance("beta");
    let gamma = instance("gamma");
    let k = key("message:channel-delete");

    assert!(store.acquire_lock(&k, &alpha, Tier::Irreversible, 0, 100).expect("alpha acquires"));
    assert!(!store.acquire_lock(&k, &beta, Tier::Irreversible, 10, 110).expect("beta contends"));
    assert!(!store.acquire_lock(&k, &gamma, Tier::Irreversible, 20, 120).expect("gamma contends"));

    // alpha's lock expires at 100; beta should now be free to acquire.
    assert!(store.acquire_lock(&k, &beta, Tier::Irreversible, 150, 250).expect("beta acquires after expiry"));
    assert!(!store.acquire_lock(&k, &gamma, Tier::Irreversible, 160, 260).expect("gamma still contends with beta"));

    store.release_lock(&k, &beta).expect("beta releases");
    assert!(store.acquire_lock(&k, &gamma, Tier::Irreversible, 170, 270).expect("gamma acquires after release"));

    let locks = store.active_locks(170).expect("reads");
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].instance, gamma);
}

#[test]
fn journal_is_extend_only_across_appends() {
    let store = InMemoryStore::new();
    let alpha = instance("alpha");
    let k = key("email:alice@example.com");

    for timestamp in 0..5 {
        store.append_journal(complete_entry(&alpha, &k, timestamp)).expect("appends");
        let entries = store.recent_journal(100).expect("reads");
        assert_eq!(entries.len(), usize::try_from(timestamp + 1).expect("small count"));
    }

    let entries = store.recent_journal(100).expect("reads");
    let timestamps: Vec<i64> = entries.iter().map(|entry| entry.timestamp).collect();
    assert_eq!(timestamps, vec![0, 1, 2, 3, 4]);
}

#[test]
fn find_recent_on_key_never_returns_an_entry_older_than_the_window() {
    let store = InMemoryStore::new();
    let alpha = instance("alpha");
    let beta = instance("beta");
    let k = key("email:alice@example.com");

    store.append_journal(complete_entry(&alpha, &k, 0)).expect("appends old entry");

    let now = 10_000;
    let window = 1_000;
    let found = store.find_recent_on_key(&k, &beta, now, window, true).expect("scans");
    assert!(found.is_none(), "an entry older than the window must not be returned");

    store.append_journal(complete_entry(&alpha, &k, now - window + 1)).expect("appends recent entry");
    let found = store.find_recent_on_key(&k, &beta, now, window, true).expect("scans");
    assert!(found.is_some_and(|entry| entry.timestamp >= now - window));
}

#[test]
fn find_recent_on_key_honors_the_include_self_flag() {
    let store = InMemoryStore::new();
    let alpha = instance("alpha");
    let k = key("email:alice@example.com");

    store.append_journal(complete_entry(&alpha, &k, 0)).expect("appends");

    let with_self = store.find_recent_on_key(&k, &alpha, 0, 1_000, true).expect("scans");
    assert!(with_self.is_some());

    let without_self = store.find_recent_on_key(&k, &alpha, 0, 1_000, false).expect("scans");
    assert!(without_self.is_none());
}

mod lock_exclusion_proptest {
    use std::collections::HashSet;

    use callosum_core::core::InstanceId;
    use callosum_core::core::Tier;
    use callosum_core::core::ContextKey;
    use callosum_core::store::CoordinationStore;
    use callosum_store::InMemoryStore;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Acquire { instance: usize, at: i64, ttl: i64 },
        Release { instance: usize, at: i64 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 0i64..50, 1i64..50).prop_map(|(instance, at, ttl)| Op::Acquire { instance, at, ttl }),
            (0..3usize, 0i64..50).prop_map(|(instance, at)| Op::Release { instance, at }),
        ]
    }

    proptest! {
        /// Regardless of how acquire/release calls from up to three instances
        /// interleave (including out-of-order timestamps within an
        /// individually-`sort`ed replay), the store never reports more than
        /// one active lock on the single context key under test at once.
        #[test]
        fn at_most_one_active_lock_at_any_observed_instant(mut ops in proptest::collection::vec(op_strategy(), 1..30)) {
            ops.sort_by_key(|op| match op {
                Op::Acquire { at, .. } | Op::Release { at, .. } => *at,
            });

            let store = InMemoryStore::new();
            let k = ContextKey::new("message:channel-delete").expect("non-empty");
            let instances: Vec<InstanceId> = (0..3)
                .map(|index| InstanceId::new(format!("instance-{index}")).expect("non-empty"))
                .collect();

            for op in ops {
                let observed_at = match op {
                    Op::Acquire { instance, at, ttl } => {
                        store.acquire_lock(&k, &instances[instance], Tier::Irreversible, at, at + ttl).expect("acquire does not error");
                        at
                    }
                    Op::Release { instance, at } => {
                        store.release_lock(&k, &instances[instance]).expect("release does not error");
                        at
                    }
                };
                let active = store.active_locks(observed_at).expect("reads");
                let holders: HashSet<&InstanceId> = active.iter().map(|lock| &lock.instance).collect();
                prop_assert!(holders.len() <= 1, "more than one instance appears to hold {:?}: {:?}", k, active);
            }
        }
    }
}
