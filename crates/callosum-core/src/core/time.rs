// crates/callosum-core/src/core/time.rs
// ============================================================================
// Module: Callosum Time Model
// Description: Wall-clock time source used by the store and decision procedure.
// Purpose: Keep lock expiry and window checks explicit and replayable in tests.
// Dependencies: std::time
// ============================================================================

//! ## Overview
//! The store and decision procedure never call [`std::time::SystemTime::now`]
//! directly. Instead, callers thread a [`Clock`] implementation through, so
//! tests can use a [`ManualClock`] to exercise TTL and window-boundary
//! behavior deterministically while production callers use [`SystemClock`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

// ============================================================================
// SECTION: Clock Trait
// ============================================================================

/// Source of the current wall-clock time, expressed as unix milliseconds.
pub trait Clock: Send + Sync {
    /// Returns the current time as unix epoch milliseconds.
    fn now_millis(&self) -> i64;
}

// ============================================================================
// SECTION: System Clock
// ============================================================================

/// Clock backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |duration| {
            i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
        })
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Clock with an explicitly advanceable value, for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current value in unix milliseconds.
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a manual clock starting at the given time.
    #[must_use]
    pub const fn new(start_millis: i64) -> Self {
        Self { millis: AtomicI64::new(start_millis) }
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance(&self, delta_millis: i64) {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst);
    }

    /// Sets the clock to an explicit value.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
