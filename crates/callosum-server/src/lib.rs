// crates/callosum-server/src/lib.rs
// ============================================================================
// Crate: callosum-server
// Description: Thin axum HTTP envelope around the gate's RPC surface.
// Purpose: Let multiple agent-runtime processes share one coordination store
// over a local transport, per the remote deployment mode.
// Dependencies: axum, callosum-core, callosum-store, tokio
// ============================================================================

//! # callosum-server
//!
//! Six routes, matching the RPC surface the hook layer relies on in
//! `remote` mode: `status`, `journal`, `intercept`, `complete`, `lock`, and
//! `unlock`. There is no decision logic here beyond request/response
//! shaping — every verdict still comes from [`callosum_core::gate::Gate`].
//! This crate is deliberately thin: it does not attempt auth, rate
//! limiting, or TLS termination, all of which belong in front of it (a
//! reverse proxy, or a dedicated layer) rather than duplicated here.

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

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
