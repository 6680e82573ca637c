// crates/callosum-store/src/lib.rs
// ============================================================================
// Crate: callosum-store
// Description: Concrete CoordinationStore backends: a file-backed store per
// the persisted state layout, and an in-memory store for tests and
// single-process plugin-mode deployments.
// Purpose: Give callosum-core's gate something to run against.
// Dependencies: callosum-core, fs2, serde_json, thiserror, tracing
// ============================================================================

//! # callosum-store
//!
//! Two [`callosum_core::store::CoordinationStore`] implementations:
//!
//! - [`memory::InMemoryStore`] — a single-process, `Arc<Mutex<_>>`-guarded
//!   store. Used by tests, the `demos/plugin-mode` binary, and any
//!   deployment where the gate and the agent runtime share an address
//!   space with no other writer.
//! - [`file::FileCoordinationStore`] — the on-disk layout described by the
//!   data model's persisted state section: an append-only, rotating
//!   journal plus single-document lock-table and context-record files,
//!   with cross-process advisory locking around every read-modify-write.

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

pub mod file;
pub mod memory;

pub use file::FileCoordinationStore;
pub use file::FileStoreConfig;
pub use memory::InMemoryStore;
