// crates/callosum-core/src/store/mod.rs
// ============================================================================
// Module: Callosum Coordination Store Interface
// Description: The journal/lock-table/context-record contract the gate relies
// on, independent of how a given deployment persists it.
// Purpose: Let the gate orchestrate classification + coordination without
// depending on a concrete storage backend.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! A [`CoordinationStore`] serializes access internally: implementations must
//! guarantee that classification-to-lock-decision has no suspension point
//! where another caller's operation can interleave and invalidate the
//! decision already made. In-process implementations typically hold a single
//! mutex across all three substores; cross-process implementations use file
//! locking or route through one serializing server.
//!
//! [`CoordinationStore::check_conflict`] never raises a conflict against the
//! calling instance's own activity — same-instance duplicate detection is
//! the decision procedure's job, via [`CoordinationStore::find_recent_on_key`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ContextKey;
use crate::core::ContextRecord;
use crate::core::InstanceId;
use crate::core::JournalEntry;
use crate::core::Lock;
use crate::core::Tier;

// ============================================================================
// SECTION: Store Error
// ============================================================================

/// Error returned by a [`CoordinationStore`] operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying persistence layer failed (I/O, serialization, lock
    /// poisoning, etc). Treated as fatal for the current call.
    #[error("coordination store backend failure: {0}")]
    Backend(String),
}

// ============================================================================
// SECTION: Conflict Outcome
// ============================================================================

/// Result of [`CoordinationStore::check_conflict`]: an active lock held by
/// another instance, or — at tier 3 and above — a recent context record
/// from another instance. Never raised against the caller's own activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// No conflicting lock or recent context record from another instance.
    None,
    /// An active lock on this context key is held by another instance.
    LockedByOther {
        /// Instance holding the conflicting lock.
        holder: InstanceId,
    },
    /// A context record on this key from another instance, within the
    /// window, but with no active lock.
    RecentOther {
        /// Instance that produced the conflicting record.
        instance: InstanceId,
        /// Unix epoch milliseconds when the conflicting record was made.
        timestamp: i64,
    },
}

impl Conflict {
    /// Returns true when this outcome represents an actual conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns the conflicting instance, if any.
    #[must_use]
    pub const fn holder(&self) -> Option<&InstanceId> {
        match self {
            Self::None => None,
            Self::LockedByOther { holder } => Some(holder),
            Self::RecentOther { instance, .. } => Some(instance),
        }
    }
}

// ============================================================================
// SECTION: Coordination Store Trait
// ============================================================================

/// Journal, lock-table, and context-record operations the gate depends on.
///
/// # Invariants
/// - At most one active (non-expired) lock exists per context key.
/// - `check_conflict` and the subsequent `acquire_lock` it informs observe a
///   consistent snapshot: no other instance's lock acquisition may be
///   interleaved between them.
pub trait CoordinationStore: Send + Sync {
    /// Appends an entry to the audit journal. Every call, regardless of
    /// tier, is recorded; a failure here is fatal for the current call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn append_journal(&self, entry: JournalEntry) -> Result<(), StoreError>;

    /// Attempts to acquire, or refresh if already held by `instance`, the
    /// advisory lock on `context_key`. Returns `true` on success, `false`
    /// when an unexpired lock held by another instance exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn acquire_lock(
        &self,
        context_key: &ContextKey,
        instance: &InstanceId,
        tier: Tier,
        now_millis: i64,
        expires_at: i64,
    ) -> Result<bool, StoreError>;

    /// Removes the active lock on `context_key` if and only if it is held
    /// by `instance`. A no-op otherwise, including when no lock exists —
    /// idempotent by design.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn release_lock(&self, context_key: &ContextKey, instance: &InstanceId) -> Result<(), StoreError>;

    /// Records a context-record trace for cross-instance conflict detection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn record_context(&self, record: ContextRecord) -> Result<(), StoreError>;

    /// Checks for a conflicting lock or, at tier 3 and above, a recent
    /// context record — both restricted to instances other than `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn check_conflict(
        &self,
        context_key: &ContextKey,
        instance: &InstanceId,
        tier: Tier,
        now_millis: i64,
        window_millis: i64,
    ) -> Result<Conflict, StoreError>;

    /// Returns the most recent `complete` journal entry on `context_key`
    /// within `window_millis` of `now_millis`, from any instance when
    /// `include_self` is true, otherwise excluding `instance`'s own entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn find_recent_on_key(
        &self,
        context_key: &ContextKey,
        instance: &InstanceId,
        now_millis: i64,
        window_millis: i64,
        include_self: bool,
    ) -> Result<Option<JournalEntry>, StoreError>;

    /// Returns the most recent context record on `context_key` within
    /// `window_millis` of `now_millis`, regardless of instance. Used by the
    /// `status` surface, not by the decision procedure itself.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn recent_context(
        &self,
        context_key: &ContextKey,
        now_millis: i64,
        window_millis: i64,
    ) -> Result<Option<ContextRecord>, StoreError>;

    /// Removes every lock whose expiry is at or before `now_millis`.
    ///
    /// Returns the number of locks swept. A maintenance operation, not
    /// itself part of the per-call decision procedure — the TTL remains the
    /// authoritative release path for a cancelled or crashed session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn sweep_expired_locks(&self, now_millis: i64) -> Result<usize, StoreError>;

    /// Returns every currently active (non-expired) lock, for the `status`
    /// RPC surface.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn active_locks(&self, now_millis: i64) -> Result<Vec<Lock>, StoreError>;

    /// Returns up to `limit` of the most recent journal entries, newest
    /// last, for the `journal` RPC surface.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn recent_journal(&self, limit: usize) -> Result<Vec<JournalEntry>, StoreError>;
}
