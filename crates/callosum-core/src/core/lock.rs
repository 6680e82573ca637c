// crates/callosum-core/src/core/lock.rs
// ============================================================================
// Module: Callosum Advisory Lock
// Description: Time-limited exclusive claim on a context key.
// Purpose: Bound the blast radius of a crashed or cancelled session.
// Dependencies: crate::core::{identifiers, tier}, serde
// ============================================================================

//! ## Overview
//! At most one active (non-expired) lock exists per context key at any
//! instant. A lock is created by `acquire`, refreshed by a same-instance
//! re-acquire, and removed by `release` or implicit expiry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ContextKey;
use crate::core::identifiers::InstanceId;
use crate::core::tier::Tier;

// ============================================================================
// SECTION: Lock
// ============================================================================

/// Advisory lock on a context key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Instance holding the lock.
    pub instance: InstanceId,
    /// Context key the lock guards.
    pub context_key: ContextKey,
    /// Tier of the call that acquired the lock.
    pub tier: Tier,
    /// Unix epoch milliseconds when the lock was acquired (or last
    /// refreshed).
    pub acquired_at: i64,
    /// Unix epoch milliseconds after which the lock is treated as absent.
    pub expires_at: i64,
}

impl Lock {
    /// Returns true when `now_millis` is past this lock's expiry.
    #[must_use]
    pub const fn is_expired(&self, now_millis: i64) -> bool {
        now_millis > self.expires_at
    }

    /// Returns true when `instance` holds this lock.
    #[must_use]
    pub fn is_held_by(&self, instance: &InstanceId) -> bool {
        &self.instance == instance
    }
}

#[cfg(test)]
mod tests {
    use super::Lock;
    use crate::core::identifiers::ContextKey;
    use crate::core::identifiers::InstanceId;
    use crate::core::tier::Tier;

    fn sample_lock() -> Lock {
        Lock {
            instance: InstanceId::new("alpha").expect("non-empty"),
            context_key: ContextKey::new("email:alice@example.com").expect("non-empty"),
            tier: Tier::Commitment,
            acquired_at: 1_000,
            expires_at: 2_000,
        }
    }

    #[test]
    fn expiry_is_strictly_after_expires_at() {
        let lock = sample_lock();
        assert!(!lock.is_expired(2_000));
        assert!(lock.is_expired(2_001));
    }

    #[test]
    fn holder_check_compares_instance() {
        let lock = sample_lock();
        assert!(lock.is_held_by(&InstanceId::new("alpha").expect("non-empty")));
        assert!(!lock.is_held_by(&InstanceId::new("beta").expect("non-empty")));
    }
}
