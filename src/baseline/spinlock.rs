//! Spin-locked staging buffer.
//!
//! Same ring as [`super::monitor`], but the monitor mutex is replaced by a
//! test-and-set spin lock: no syscall on contention, just a pause-hinted
//! retry loop. Wins over the mutex when critical sections are tens of
//! nanoseconds and loses badly once a holder is preempted.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use super::BoundedBytes;

/// Minimal test-and-set spin lock.
///
/// # Invariants
/// - `locked == true` exactly while one `SpinGuard` is live.
struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: the lock hands out at most one guard at a time, so the value is
// never aliased mutably.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    fn new(value: T) -> Self {
        Self { locked: AtomicBool::new(false), value: UnsafeCell::new(value) }
    }

    fn lock(&self) -> SpinGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            // Read-only spin while held keeps the line shared between
            // cores instead of ping-ponging it with failed swaps.
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        SpinGuard { lock: self }
    }
}

struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock, so this is the only live view.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref`.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Circular byte buffer under a spin lock.
pub struct SpinBuffer<const CAP: usize> {
    inner: SpinLock<BoundedBytes<CAP>>,
    id: u32,
}

impl<const CAP: usize> SpinBuffer<CAP> {
    pub fn new(id: u32) -> Self {
        Self { inner: SpinLock::new(BoundedBytes::new()), id }
    }

    /// Copies `data` in, or returns `false` when it does not fit
    /// contiguously right now.
    pub fn push(&self, data: &[u8]) -> bool {
        self.inner.lock().push(data)
    }

    /// Contiguous readable bytes, pinned by the held lock. Keep the guard
    /// short-lived: the producer spins while it exists.
    pub fn peek(&self) -> Peek<'_, CAP> {
        let mut guard = self.inner.lock();
        let (offset, len) = guard.peek();
        Peek { guard, offset, len }
    }

    /// Releases the first `nbytes` previously peeked.
    pub fn pop(&self, nbytes: usize) {
        self.inner.lock().pop(nbytes);
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Total bytes accepted and released so far.
    pub fn counters(&self) -> (u64, u64) {
        let guard = self.inner.lock();
        (guard.bytes_pushed(), guard.bytes_popped())
    }
}

/// Readable region of a [`SpinBuffer`], pinned by the held lock.
pub struct Peek<'a, const CAP: usize> {
    guard: SpinGuard<'a, BoundedBytes<CAP>>,
    offset: usize,
    len: usize,
}

impl<const CAP: usize> Deref for Peek<'_, CAP> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.slice(self.offset, self.len)
    }
}
