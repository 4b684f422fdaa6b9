//! One-way memory barriers used by the staging ring.
//!
//! The ring publishes its positions with relaxed single-word stores and
//! establishes ordering with these two standalone fences instead of
//! sequentially-consistent atomics. On x86-64 both functions compile to a
//! compiler barrier only (no instruction); on weakly-ordered targets they
//! emit the corresponding hardware fence.
//!
//! Pairing:
//!
//! ```text
//! Producer: write reservation bytes, store_release(), publish producer_pos
//! Consumer: observe producer_pos, load_acquire(), read bytes / end marker
//! ```
//!
//! Under `cfg(loom)` the fences route through loom so the model checker
//! explores their orderings together with the ring's atomics.

#[cfg(not(loom))]
use core::sync::atomic::{fence, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{fence, Ordering};

/// Release fence: stores issued before this call are visible to another
/// thread before any store issued after it.
///
/// Pairs with [`load_acquire`] on the observing thread.
#[inline(always)]
pub fn store_release() {
    fence(Ordering::Release);
}

/// Acquire fence: loads issued after this call cannot be satisfied with
/// values older than a load issued before it.
///
/// Pairs with [`store_release`] on the publishing thread.
#[inline(always)]
pub fn load_acquire() {
    fence(Ordering::Acquire);
}
