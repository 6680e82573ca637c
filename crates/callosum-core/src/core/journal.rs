// crates/callosum-core/src/core/journal.rs
// ============================================================================
// Module: Callosum Journal Entry
// Description: Append-only audit record for intercepted tool calls.
// Purpose: Capture the audit contract that every call is recorded regardless
// of tier, and provide a stable digest of call parameters for conflict notes.
// Dependencies: crate::core::{identifiers, tier}, serde, sha2
// ============================================================================

//! ## Overview
//! A journal entry is immutable once appended. The journal itself is
//! append-only: the core never mutates or deletes an entry after it is
//! written. Wall-clock timestamps are a best-effort sortable field; append
//! order, not timestamp, is the entry's primary ordering.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::core::identifiers::ContextKey;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::RuleName;
use crate::core::tier::Tier;

// ============================================================================
// SECTION: Action
// ============================================================================

/// Lifecycle action recorded against a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Pre-call interception; always recorded, regardless of tier.
    Intercept,
    /// Post-call completion with no error.
    Complete,
    /// Post-call completion with an error.
    Failed,
    /// The gate refused the call (block or pause verdict).
    Blocked,
}

// ============================================================================
// SECTION: Journal Entry
// ============================================================================

/// Append-only audit record for a single intercepted tool call.
///
/// # Invariants
/// - Immutable after construction; the journal never rewrites an entry.
/// - `timestamp` is a best-effort sortable field, not the primary ordering —
///   append order within a store is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Wall-clock time of the append, as unix epoch milliseconds.
    pub timestamp: i64,
    /// Instance that produced this entry.
    pub instance: InstanceId,
    /// Tool name the entry concerns.
    pub tool: String,
    /// Tier assigned by the classifier.
    pub tier: Tier,
    /// Name of the rule that produced the classification.
    pub rule_name: RuleName,
    /// Context key, if the rule produced one.
    pub context_key: Option<ContextKey>,
    /// Lifecycle action this entry records.
    pub action: Action,
    /// Stable digest of the call's parameters, for conflict notes without
    /// persisting the raw parameter payload.
    pub params_digest: Option<String>,
    /// Human-readable note attached when a conflict was detected or the
    /// call was blocked/paused.
    pub conflict_note: Option<String>,
}

impl JournalEntry {
    /// Computes a stable, short digest over a parameter payload's canonical
    /// JSON form.
    ///
    /// Used so journal entries can reference "the same call" without storing
    /// the (potentially sensitive) raw parameters.
    #[must_use]
    pub fn digest_params(params: &serde_json::Value) -> String {
        let canonical = serde_json::to_vec(params).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let digest = hasher.finalize();
        hex_encode(&digest[..8])
    }
}

/// Encodes a byte slice as lowercase hex without pulling in a dedicated crate.
fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
