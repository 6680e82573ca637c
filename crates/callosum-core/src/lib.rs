// crates/callosum-core/src/lib.rs
// ============================================================================
// Crate: callosum-core
// Description: Data model, template resolver, tier classifier, coordination
// store interface, and decision procedure for the Callosum action gate.
// Purpose: House the parts of Callosum that do not depend on how rules or
// coordination state are actually persisted.
// Dependencies: regex, serde, serde_json, sha2, thiserror, tracing
// ============================================================================

//! # callosum-core
//!
//! Callosum sits between an AI-agent runtime and the tools it calls,
//! classifying each call into a risk tier and gating it through an
//! append-only journal, advisory locks, and short-horizon context records.
//! This crate implements the parts of that gate that are storage-agnostic:
//!
//! - [`core`] — the data model (tiers, identifiers, journal entries, locks,
//!   context records, the injected [`core::Clock`]).
//! - [`template`] — the `{EXPR}` context-key template language.
//! - [`classifier`] — compiles an ordered rule list into a first-match-wins
//!   tier classifier.
//! - [`store`] — the [`store::CoordinationStore`] trait a concrete backend
//!   implements.
//! - [`gate`] — the [`gate::Gate`] decision procedure wiring classifier and
//!   store together across the before/after tool-call hook surface.

#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        clippy::missing_docs_in_private_items,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]

pub mod classifier;
pub mod core;
pub mod error;
pub mod gate;
pub mod store;
pub mod template;

pub use error::ClassifyError;
