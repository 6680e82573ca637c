// crates/callosum-core/src/core/tier.rs
// ============================================================================
// Module: Callosum Tier
// Description: The five-level risk tier assigned by the classifier.
// Purpose: Encode fixed tier semantics and enforcement thresholds.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A tier is a small integer 0-4 with fixed semantics (see the data model).
//! Enforcement escalates monotonically with the tier: journaling at tier 1,
//! context recording at tier 2, duplicate checks and advisory locks at tier
//! 3, and a hard block on lock conflict at tier 4.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Tier
// ============================================================================

/// Risk tier assigned to a classified tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tier {
    /// Read-only or inert; no enforcement.
    Inert = 0,
    /// Internal mutation (local file, shell); journal only.
    Internal = 1,
    /// Routine external action (chat message, sub-session); journal and
    /// context record.
    Routine = 2,
    /// External commitment (email, cron mutation); duplicate check and
    /// advisory lock.
    Commitment = 3,
    /// Irreversible (delete, config apply); hard block on conflict.
    Irreversible = 4,
}

/// Error returned when a raw integer does not name a known tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tier value out of range: {0} (expected 0-4)")]
pub struct TierRangeError(pub u8);

impl Tier {
    /// Returns the tier as its underlying integer value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true when this tier requires a journal entry on intercept.
    ///
    /// Per the data model, every call is journaled regardless of tier; this
    /// helper exists for documentation symmetry with the other `requires_*`
    /// predicates and always returns `true`.
    #[must_use]
    pub const fn requires_journal(self) -> bool {
        true
    }

    /// Returns true when this tier requires a short-horizon context record.
    #[must_use]
    pub const fn requires_context_record(self) -> bool {
        self.as_u8() >= Self::Routine.as_u8()
    }

    /// Returns true when this tier requires duplicate detection and an
    /// advisory lock.
    #[must_use]
    pub const fn requires_duplicate_check(self) -> bool {
        self.as_u8() >= Self::Commitment.as_u8()
    }

    /// Returns true when a lock conflict at this tier is a hard block
    /// rather than an allow-with-warning.
    #[must_use]
    pub const fn hard_blocks_on_conflict(self) -> bool {
        self.as_u8() >= Self::Irreversible.as_u8()
    }
}

impl TryFrom<u8> for Tier {
    type Error = TierRangeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Inert),
            1 => Ok(Self::Internal),
            2 => Ok(Self::Routine),
            3 => Ok(Self::Commitment),
            4 => Ok(Self::Irreversible),
            other => Err(TierRangeError(other)),
        }
    }
}
