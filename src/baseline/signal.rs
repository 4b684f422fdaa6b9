//! Condvar-signalled staging buffer.
//!
//! Producer and consumer block instead of spinning: `push` waits on
//! "consumed some", `pop` waits on "produced some". Friendly to
//! oversubscribed machines, but every handoff risks a futex round trip,
//! which is orders of magnitude above the staging ring's fast path.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::BoundedBytes;

/// Circular byte buffer with blocking push and pop.
pub struct SignalBuffer<const CAP: usize> {
    inner: Mutex<BoundedBytes<CAP>>,
    /// Signalled after a pop frees space.
    consumed_some: Condvar,
    /// Signalled after a push adds data.
    produced_some: Condvar,
    id: u32,
}

impl<const CAP: usize> SignalBuffer<CAP> {
    pub fn new(id: u32) -> Self {
        Self {
            inner: Mutex::new(BoundedBytes::new()),
            consumed_some: Condvar::new(),
            produced_some: Condvar::new(),
            id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoundedBytes<CAP>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies `data` in, waiting for the consumer to free space when the
    /// buffer is full. `data` must be shorter than `CAP`.
    pub fn push(&self, data: &[u8]) {
        debug_assert!(data.len() < CAP, "a {}-byte push can never fit", data.len());

        let mut inner = self.lock();
        while !inner.push(data) {
            inner = self
                .consumed_some
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(inner);
        self.produced_some.notify_one();
    }

    /// Contiguous readable byte count right now.
    pub fn readable_bytes(&self) -> usize {
        self.lock().peek().1
    }

    /// Releases `nbytes`, waiting until at least that much is contiguously
    /// readable.
    pub fn pop(&self, nbytes: usize) {
        let mut inner = self.lock();
        loop {
            let (_, avail) = inner.peek();
            if avail >= nbytes {
                break;
            }
            inner = self
                .produced_some
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.pop(nbytes);
        drop(inner);
        self.consumed_some.notify_all();
    }

    /// Copies out and releases `nbytes`, with the same blocking rule as
    /// [`pop`](Self::pop).
    pub fn pop_into(&self, out: &mut Vec<u8>, nbytes: usize) {
        let mut inner = self.lock();
        loop {
            let (offset, avail) = inner.peek();
            if avail >= nbytes {
                out.extend_from_slice(inner.slice(offset, nbytes));
                break;
            }
            inner = self
                .produced_some
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner.pop(nbytes);
        drop(inner);
        self.consumed_some.notify_all();
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Total bytes accepted and released so far.
    pub fn counters(&self) -> (u64, u64) {
        let guard = self.lock();
        (guard.bytes_pushed(), guard.bytes_popped())
    }
}
