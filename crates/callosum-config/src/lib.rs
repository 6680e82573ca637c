// crates/callosum-config/src/lib.rs
// ============================================================================
// Crate: callosum-config
// Description: Canonical configuration model and rule-file loading for the
// Callosum action gate.
// Purpose: Single source of truth for callosum.toml and tiers.json semantics.
// Dependencies: callosum-core, serde, toml
// ============================================================================

//! # callosum-config
//!
//! Two loaders:
//!
//! - [`config::CallosumConfig`] — `callosum.toml` plus `CALLOSUM_`-prefixed
//!   environment overrides: state directory, lock expiry, duplicate window,
//!   instance id, local/remote mode.
//! - [`rules::load_rule_specs`] — `tiers.json`, a `{ description?, rules }`
//!   document unwrapped into a `Vec<RuleSpec>` ready for
//!   [`callosum_core::classifier::TierClassifier::compile`]. Absent file
//!   falls back to a built-in default rule set rather than failing startup.

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

pub mod config;
pub mod error;
pub mod rules;

pub use config::CallosumConfig;
pub use config::Mode;
pub use error::ConfigError;
pub use rules::load_rule_specs;
