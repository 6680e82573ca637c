// crates/callosum-core/src/core/context_record.rs
// ============================================================================
// Module: Callosum Context Record
// Description: Short-horizon per-instance trace used for cross-instance
// conflict detection.
// Purpose: Bound cross-session conflict visibility to a configurable window.
// Dependencies: crate::core::{identifiers, tier}, serde
// ============================================================================

//! ## Overview
//! Many context records may share a context key. Records older than the
//! configured window are considered absent on read, regardless of whether
//! they have been physically pruned yet.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ContextKey;
use crate::core::identifiers::InstanceId;
use crate::core::tier::Tier;

// ============================================================================
// SECTION: Context Record
// ============================================================================

/// A single tier-2+ action trace, keyed by context key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Instance that performed the action.
    pub instance: InstanceId,
    /// Context key the action affected.
    pub context_key: ContextKey,
    /// Tier of the action.
    pub tier: Tier,
    /// Unix epoch milliseconds when the action was recorded.
    pub timestamp: i64,
    /// Tool name of the action.
    pub tool: String,
}

impl ContextRecord {
    /// Returns true when this record is still within `window_millis` of
    /// `now_millis`.
    #[must_use]
    pub const fn is_within_window(&self, now_millis: i64, window_millis: i64) -> bool {
        now_millis - self.timestamp <= window_millis
    }
}
