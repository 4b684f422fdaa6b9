//! Monitor-style staging buffer: one mutex around every operation.
//!
//! The simplest correct implementation and the slowest under contention:
//! producer and consumer serialize on the same lock and bounce its cache
//! line between cores on every push and pop.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::BoundedBytes;

/// Circular byte buffer using monitor-style locking.
pub struct MonitorBuffer<const CAP: usize> {
    inner: Mutex<BoundedBytes<CAP>>,
    id: u32,
}

impl<const CAP: usize> MonitorBuffer<CAP> {
    pub fn new(id: u32) -> Self {
        Self { inner: Mutex::new(BoundedBytes::new()), id }
    }

    fn lock(&self) -> MutexGuard<'_, BoundedBytes<CAP>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies `data` in, or returns `false` when it does not fit
    /// contiguously right now.
    pub fn push(&self, data: &[u8]) -> bool {
        self.lock().push(data)
    }

    /// Contiguous readable bytes, held under the lock until the guard
    /// drops. Release them with [`pop`](Self::pop).
    pub fn peek(&self) -> Peek<'_, CAP> {
        let mut guard = self.lock();
        let (offset, len) = guard.peek();
        Peek { guard, offset, len }
    }

    /// Releases the first `nbytes` previously peeked.
    pub fn pop(&self, nbytes: usize) {
        self.lock().pop(nbytes);
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

/// Readable region of a [`MonitorBuffer`], pinned by the held lock.
pub struct Peek<'a, const CAP: usize> {
    guard: MutexGuard<'a, BoundedBytes<CAP>>,
    offset: usize,
    len: usize,
}

impl<const CAP: usize> std::ops::Deref for Peek<'_, CAP> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.slice(self.offset, self.len)
    }
}
