//! Lock-free SPSC staging byte ring with reserve/commit semantics.
//!
//! # Design
//!
//! Every producer (logging) thread owns one `StagingRing`; a single
//! background consumer thread drains all of them. The producer reserves a
//! contiguous span of bytes, fills it in place, then commits; until the
//! commit the bytes are invisible to the consumer. The consumer peeks at
//! the contiguous committed region and releases it piece-wise.
//!
//! # Key properties
//!
//! - **Wait-free fast path**: `reserve` compares the request against a
//!   producer-private lower bound on free space (`min_free_space`) and
//!   returns immediately when it fits: no atomic operations, no fences,
//!   no load of the consumer's cache line.
//! - **Cached remote index**: the free-space bound is refreshed from
//!   `consumer_pos` only when the fast check fails, the same trick our
//!   fixed-slot SPSC ring uses to keep cache-coherence traffic off the
//!   hot path.
//! - **End-of-wrap marker**: reservations are contiguous, so when the tail
//!   of the storage region is too small the producer publishes
//!   `end_of_recorded_space` and resumes at the base. The consumer jumps
//!   to the base when it reaches the marker.
//! - **Cache-line isolation**: the producer-published words and the
//!   consumer-published words are separated by a `GAP`-byte spacer
//!   (`0` or one cache line) so the two threads do not fight over a line.
//!
//! # Ordering rationale
//!
//! ```text
//! Producer: write bytes, store_release(), relaxed-publish producer_pos
//! Consumer: acquire-load producer_pos, load_acquire(), read marker/bytes
//! Consumer: release-publish consumer_pos
//! Producer: acquire-load consumer_pos before reusing released bytes
//! ```
//!
//! Positions never use sequentially-consistent operations and the ring
//! takes no locks; on x86-64 every barrier above is compiler-only.
//!
//! # Emptiness rule
//!
//! `producer_pos == consumer_pos` always means *empty*, so one byte of
//! `CAP` is never handed out: a region of `f` free bytes admits a
//! reservation of `n` only when `f > n`, and a commit may not land the
//! producer position on `CAP` itself.
//!
//! # Safety
//!
//! Storage is a raw heap allocation shared by exactly two threads whose
//! access ranges are disjoint by protocol: the producer writes only bytes
//! the consumer has released, the consumer reads only bytes the producer
//! has committed. Each unsafe block states the invariant it relies on.
//! Run the loom model (`RUSTFLAGS="--cfg loom" cargo test --release`) when
//! touching the ordering.

use std::alloc::{alloc, dealloc, Layout};
use std::error::Error;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;
use std::sync::Arc;

use crossbeam_utils::Backoff;

#[cfg(not(loom))]
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::fence;
use crate::stats::ProducerStats;

#[cfg(feature = "perf-stats")]
use crate::cycles;

/// Storage allocation failure at ring construction.
///
/// Fatal to the ring being created: the owning thread has nowhere to
/// stage its records. Nothing was allocated when this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    /// Requested storage size in bytes.
    pub bytes: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "staging ring storage allocation of {} bytes failed", self.bytes)
    }
}

impl Error for AllocError {}

/// Shared record of one staging ring.
///
/// Field order is load-bearing: the producer-published words come first,
/// then the spacer, then the consumer-published words, so with `GAP >= 64`
/// the two groups land on different cache lines. The byte storage is a
/// separate allocation; inlining it here would drag it onto the producer
/// line.
///
/// # Invariants
///
/// - `producer_pos`, `consumer_pos`, `end_of_recorded_space` are all in
///   `0..=CAP` at every observable moment.
/// - `end_of_recorded_space == CAP` except between a wrap decision and the
///   consumer's jump to the base, when it names the end of the tail data.
/// - Only the producer stores `producer_pos` and `end_of_recorded_space`;
///   only the consumer stores `consumer_pos`.
#[repr(C)]
struct StagingRing<const CAP: usize, const GAP: usize> {
    /// Offset where the producer's next write begins.
    producer_pos: AtomicUsize,
    /// Exclusive upper bound of consumer-readable bytes in the tail.
    end_of_recorded_space: AtomicUsize,
    /// Spacer keeping the consumer words off the producer's cache line.
    _spacer: [u8; GAP],
    /// Offset where the consumer's next read begins.
    consumer_pos: AtomicUsize,
    /// The owning producer handle is gone; reclaim once drained.
    should_deallocate: AtomicBool,
    id: u32,
    storage: NonNull<u8>,
}

// SAFETY: the SPSC protocol gives the two threads disjoint byte ranges
// (producer writes released bytes, consumer reads committed bytes) and all
// cross-thread words are atomics with the orderings documented above.
unsafe impl<const CAP: usize, const GAP: usize> Send for StagingRing<CAP, GAP> {}
unsafe impl<const CAP: usize, const GAP: usize> Sync for StagingRing<CAP, GAP> {}

impl<const CAP: usize, const GAP: usize> StagingRing<CAP, GAP> {
    /// Compile-time capacity validation. One byte is reserved to tell
    /// empty from full, so a 1-byte ring could never accept data.
    const CAPACITY_OK: () = {
        assert!(CAP >= 2, "staging ring capacity must be at least 2 bytes");
        assert!(CAP <= isize::MAX as usize, "staging ring capacity overflows isize");
    };

    fn layout() -> Layout {
        // CAP <= isize::MAX is enforced at compile time, so this cannot fail.
        Layout::array::<u8>(CAP).expect("validated capacity")
    }

    /// Base pointer of the byte storage.
    #[inline(always)]
    fn base(&self) -> *mut u8 {
        self.storage.as_ptr()
    }
}

impl<const CAP: usize, const GAP: usize> Drop for StagingRing<CAP, GAP> {
    fn drop(&mut self) {
        // SAFETY: `storage` was allocated with exactly this layout in
        // `staging_buffer` and is only freed here, after both handles are
        // gone (we are behind the last Arc).
        unsafe { dealloc(self.base(), Self::layout()) };
    }
}

/// Creates one staging ring and returns its producer and consumer handles.
///
/// `CAP` is the byte capacity (at most `CAP - 1` bytes are ever in flight);
/// `GAP` is the spacer between the producer- and consumer-owned words,
/// `0` or [`crate::config::CACHE_LINE`]. The handles may be moved to
/// different threads; the storage is reclaimed when both are dropped.
///
/// # Errors
///
/// [`AllocError`] if the `CAP`-byte storage allocation fails; the caller
/// cannot log without a ring, so this is surfaced rather than retried.
pub fn staging_buffer<const CAP: usize, const GAP: usize>(
    id: u32,
) -> Result<(Producer<CAP, GAP>, Consumer<CAP, GAP>), AllocError> {
    // Force the compile-time capacity check for this instantiation.
    let () = StagingRing::<CAP, GAP>::CAPACITY_OK;

    // SAFETY: the layout is non-zero-sized (CAP >= 2).
    let storage = NonNull::new(unsafe { alloc(StagingRing::<CAP, GAP>::layout()) })
        .ok_or(AllocError { bytes: CAP })?;

    let ring = Arc::new(StagingRing::<CAP, GAP> {
        producer_pos: AtomicUsize::new(0),
        end_of_recorded_space: AtomicUsize::new(CAP),
        _spacer: [0u8; GAP],
        consumer_pos: AtomicUsize::new(0),
        should_deallocate: AtomicBool::new(false),
        id,
        storage,
    });

    let producer = Producer {
        ring: Arc::clone(&ring),
        pos: 0,
        min_free_space: CAP,
        stats: ProducerStats::default(),
        #[cfg(feature = "perf-stats")]
        cycles_in_10ns: cycles::from_nanoseconds(10).max(1),
    };
    let consumer = Consumer { ring, pos: 0, peeked: 0 };

    Ok((producer, consumer))
}

// ============================================================================
// Producer
// ============================================================================

/// Owning producer handle of a staging ring.
///
/// `Send + !Sync` by design: exactly one thread records through it at a
/// time (enforced by `&mut self`), though it may be moved between threads.
/// Dropping the handle marks the ring for deletion, so a producer thread
/// that exits always signals the consumer's reclaim path.
pub struct Producer<const CAP: usize, const GAP: usize> {
    ring: Arc<StagingRing<CAP, GAP>>,
    /// Private mirror of the published producer offset. The fast path
    /// never touches the atomic.
    pos: usize,
    /// Lower bound on contiguous free bytes ahead of `pos`. Never exceeds
    /// the true free span; refreshed from `consumer_pos` only on the slow
    /// path.
    min_free_space: usize,
    stats: ProducerStats,
    #[cfg(feature = "perf-stats")]
    cycles_in_10ns: u64,
}

impl<const CAP: usize, const GAP: usize> Producer<CAP, GAP> {
    /// Reserves `nbytes` contiguous writable bytes, spinning behind the
    /// consumer until they exist.
    ///
    /// The reservation is invisible to the consumer until it is committed
    /// (dropping the guard commits it whole). `nbytes` must be in
    /// `1..CAP`; a `CAP`-sized reservation can never be satisfied because
    /// one byte distinguishes empty from full.
    #[inline(always)]
    pub fn reserve(&mut self, nbytes: usize) -> Reservation<'_, CAP, GAP> {
        debug_assert!(nbytes > 0 && nbytes < CAP, "reservation of {nbytes} bytes");
        self.stats.allocations += 1;

        // Fast in-line path: no atomics, no fences.
        if nbytes < self.min_free_space {
            return Reservation { producer: self, len: nbytes };
        }

        let reserved = self.reserve_internal(nbytes, true);
        debug_assert!(reserved, "blocking reserve returned without space");
        Reservation { producer: self, len: nbytes }
    }

    /// Non-blocking [`reserve`](Self::reserve): returns `None` instead of
    /// spinning when the space does not currently exist.
    ///
    /// A refused call may still publish the end-of-wrap marker or complete
    /// a pending wrap; the refusal only means the reservation itself did
    /// not fit yet.
    #[inline]
    pub fn try_reserve(&mut self, nbytes: usize) -> Option<Reservation<'_, CAP, GAP>> {
        debug_assert!(nbytes > 0 && nbytes < CAP, "reservation of {nbytes} bytes");
        self.stats.allocations += 1;

        if nbytes < self.min_free_space {
            return Some(Reservation { producer: self, len: nbytes });
        }

        if self.reserve_internal(nbytes, false) {
            Some(Reservation { producer: self, len: nbytes })
        } else {
            None
        }
    }

    /// Slow path: recompute the free-space bound from a fresh read of the
    /// consumer position, wrapping to the base when the tail is too small.
    ///
    /// Touches the word the consumer publishes, so it pays cache-coherence
    /// cost; `reserve` only comes here when the cached bound is exhausted.
    /// Returns whether at least `nbytes + 1` contiguous free bytes are now
    /// ahead of the producer position.
    #[cold]
    fn reserve_internal(&mut self, nbytes: usize, blocking: bool) -> bool {
        #[cfg(feature = "perf-stats")]
        let entered = cycles::rdtsc();

        let backoff = Backoff::new();

        // All space checks are strict so the positions can never come to
        // coincide through a reservation: `==` must keep meaning empty.
        while self.min_free_space <= nbytes {
            // The consumer advances this concurrently; compute against one
            // consistent snapshot. Acquire pairs with the consumer's
            // release publish so bytes it released are done being read.
            let cached_consumer_pos = self.ring.consumer_pos.load(Ordering::Acquire);

            if cached_consumer_pos <= self.pos {
                // Free space is the tail [pos, CAP), then maybe the head.
                self.min_free_space = CAP - self.pos;
                if self.min_free_space > nbytes {
                    break;
                }

                // Tail too small: mark where valid data ends and resume at
                // the base.
                self.ring
                    .end_of_recorded_space
                    .store(self.pos, Ordering::Relaxed);

                // Wrapping onto a consumer sitting at the base would make
                // the positions coincide on a non-empty ring; hold the
                // wrap until it moves.
                if cached_consumer_pos != 0 {
                    // The marker must be visible before the wrapped
                    // position is.
                    fence::store_release();
                    self.pos = 0;
                    self.ring.producer_pos.store(0, Ordering::Relaxed);
                    self.min_free_space = cached_consumer_pos;
                }
            } else {
                // Head-writing: free space is the single span up to the
                // consumer.
                self.min_free_space = cached_consumer_pos - self.pos;
            }

            if self.min_free_space <= nbytes {
                if !blocking {
                    return false;
                }
                backoff.spin();
            }
        }

        #[cfg(feature = "perf-stats")]
        {
            let blocked = cycles::rdtsc().wrapping_sub(entered);
            self.stats.blocked_cycles = self.stats.blocked_cycles.wrapping_add(blocked);
            self.stats.blocked_dist.record(blocked, self.cycles_in_10ns);
        }
        // Counts slow-path entries, including ones that found space on the
        // first probe.
        self.stats.blocked_events = self.stats.blocked_events.wrapping_add(1);
        true
    }

    /// Publishes the first `nbytes` of the current reservation.
    fn finish(&mut self, nbytes: usize) {
        debug_assert!(
            nbytes < self.min_free_space,
            "commit of {nbytes} bytes exceeds reserved space"
        );
        debug_assert!(self.pos + nbytes < CAP, "commit runs past the storage end");

        // The reservation's bytes must be globally visible before the
        // advanced position is.
        fence::store_release();
        self.min_free_space -= nbytes;
        self.pos += nbytes;
        self.ring.producer_pos.store(self.pos, Ordering::Relaxed);
    }

    /// Marks the ring as ready to reclaim once the consumer has drained
    /// it. Sticky; also issued by `drop`.
    pub fn mark_for_deletion(&self) {
        self.ring.should_deallocate.store(true, Ordering::Release);
    }

    /// Identifier assigned at construction.
    pub fn id(&self) -> u32 {
        self.ring.id
    }

    /// Snapshot of the producer-private counters.
    ///
    /// Reading from another thread is only meaningful as a snapshot taken
    /// by the producer and handed over; the fields carry no synchronization
    /// of their own.
    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    /// Byte capacity of the ring. At most `capacity() - 1` bytes are ever
    /// in flight.
    pub const fn capacity(&self) -> usize {
        CAP
    }
}

impl<const CAP: usize, const GAP: usize> Drop for Producer<CAP, GAP> {
    fn drop(&mut self) {
        self.mark_for_deletion();
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Writable span handed out by [`Producer::reserve`].
///
/// Derefs to `&mut [u8]` of the reserved length. Dropping the guard
/// commits the whole span to the consumer; [`commit`](Self::commit) is the
/// explicit spelling and [`commit_partial`](Self::commit_partial) publishes
/// a prefix. There is no way to abandon a reservation: the bytes of an
/// untouched span are published uninitialized, which is why `reserve`
/// callers fill before returning.
pub struct Reservation<'a, const CAP: usize, const GAP: usize> {
    producer: &'a mut Producer<CAP, GAP>,
    len: usize,
}

impl<const CAP: usize, const GAP: usize> Reservation<'_, CAP, GAP> {
    /// Number of reserved bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Publishes the whole reservation. Equivalent to dropping the guard.
    pub fn commit(self) {}

    /// Publishes only the first `nbytes` of the reservation.
    ///
    /// The remainder is returned to the free span. `nbytes` must not
    /// exceed the reserved length.
    pub fn commit_partial(mut self, nbytes: usize) {
        debug_assert!(nbytes <= self.len, "partial commit exceeds reservation");
        self.len = nbytes;
    }
}

impl<const CAP: usize, const GAP: usize> Deref for Reservation<'_, CAP, GAP> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &[u8] {
        // SAFETY: `reserve` proved `[pos, pos + len)` lies inside the
        // storage and ahead of the consumer; the consumer cannot observe
        // it until `finish` publishes.
        unsafe { slice::from_raw_parts(self.producer.ring.base().add(self.producer.pos), self.len) }
    }
}

impl<const CAP: usize, const GAP: usize> DerefMut for Reservation<'_, CAP, GAP> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `deref`; the `&mut Producer` borrow makes this the
        // only live view of the span.
        unsafe {
            slice::from_raw_parts_mut(self.producer.ring.base().add(self.producer.pos), self.len)
        }
    }
}

impl<const CAP: usize, const GAP: usize> Drop for Reservation<'_, CAP, GAP> {
    fn drop(&mut self) {
        self.producer.finish(self.len);
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Owning consumer handle of a staging ring.
///
/// `Send + !Sync` like the producer: one drain thread at a time, enforced
/// by `&mut self`.
pub struct Consumer<const CAP: usize, const GAP: usize> {
    ring: Arc<StagingRing<CAP, GAP>>,
    /// Private mirror of the published consumer offset.
    pos: usize,
    /// Bytes reported by the last `peek` and not yet consumed. Bounds the
    /// `consume` precondition.
    peeked: usize,
}

impl<const CAP: usize, const GAP: usize> Consumer<CAP, GAP> {
    /// Returns the contiguous committed bytes starting at the read
    /// position.
    ///
    /// Idempotent and side-effect-free, except that reaching the
    /// end-of-wrap marker moves the read position back to the base before
    /// reporting the head region. An empty slice means the ring holds no
    /// committed bytes right now. Consume released bytes piece-wise with
    /// [`consume`](Self::consume) to unblock the producer early.
    pub fn peek(&mut self) -> &[u8] {
        // One consistent snapshot; the producer may advance it while we
        // look. Acquire pairs with the producer's release fence so the
        // bytes behind the position are initialized.
        let cached_producer_pos = self.ring.producer_pos.load(Ordering::Acquire);

        if cached_producer_pos < self.pos {
            // The producer has wrapped. The marker must not be read from
            // before this snapshot of the position.
            fence::load_acquire();
            let end = self.ring.end_of_recorded_space.load(Ordering::Relaxed);
            debug_assert!(end >= self.pos && end <= CAP, "end marker out of range");

            let avail = end - self.pos;
            if avail > 0 {
                self.peeked = avail;
                // SAFETY: `[pos, end)` was committed before the wrap was
                // published.
                return unsafe { slice::from_raw_parts(self.ring.base().add(self.pos), avail) };
            }

            // Reached the end marker: the rest of the data starts at the
            // base.
            self.pos = 0;
            self.ring.consumer_pos.store(0, Ordering::Release);
        }

        let avail = cached_producer_pos - self.pos;
        self.peeked = avail;
        // SAFETY: `[pos, cached_producer_pos)` is committed data; the
        // producer will not reuse it until `consume` releases it.
        unsafe { slice::from_raw_parts(self.ring.base().add(self.pos), avail) }
    }

    /// Releases the first `nbytes` of the last peek back to the producer.
    ///
    /// `nbytes` must not exceed what the preceding [`peek`](Self::peek)
    /// returned (checked in debug builds; release builds corrupt the queue
    /// on violation).
    pub fn consume(&mut self, nbytes: usize) {
        debug_assert!(nbytes <= self.peeked, "consuming {nbytes} bytes, peeked {}", self.peeked);
        self.peeked -= nbytes;
        self.pos += nbytes;
        // Release: our reads of the region must be done before the
        // producer can observe it as free and rewrite it.
        self.ring.consumer_pos.store(self.pos, Ordering::Release);
    }

    /// Whether the owning producer is gone and every byte has been
    /// drained.
    ///
    /// Advisory: the reclaim path re-verifies by virtue of dropping this
    /// handle, which is what actually releases the storage.
    pub fn can_delete(&self) -> bool {
        self.ring.should_deallocate.load(Ordering::Acquire)
            && self.ring.consumer_pos.load(Ordering::Relaxed)
                == self.ring.producer_pos.load(Ordering::Relaxed)
    }

    /// Identifier assigned at construction.
    pub fn id(&self) -> u32 {
        self.ring.id
    }

    /// Byte capacity of the ring.
    pub const fn capacity(&self) -> usize {
        CAP
    }
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================


// ============================================================================
// Loom Tests
// ============================================================================

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;

    /// Producer commits fixed records through a wrap while the consumer
    /// drains; loom explores the interleavings of the position words and
    /// the fences.
    fn record_round_trip<const CAP: usize, const GAP: usize>(records: usize, record: usize) {
        loom::model(move || {
            let (mut tx, mut rx) = staging_buffer::<CAP, GAP>(0).expect("allocation");

            let producer = thread::spawn(move || {
                for i in 0..records {
                    loop {
                        match tx.try_reserve(record) {
                            Some(mut r) => {
                                r.fill(i as u8 + 1);
                                r.commit();
                                break;
                            }
                            None => thread::yield_now(),
                        }
                    }
                }
            });

            let consumer = thread::spawn(move || {
                let mut received = Vec::with_capacity(records * record);
                while received.len() < records * record {
                    let bytes = rx.peek().to_vec();
                    if bytes.is_empty() {
                        thread::yield_now();
                        continue;
                    }
                    received.extend_from_slice(&bytes);
                    rx.consume(bytes.len());
                }
                received
            });

            producer.join().unwrap();
            let received = consumer.join().unwrap();

            for (i, chunk) in received.chunks_exact(record).enumerate() {
                assert!(
                    chunk.iter().all(|&b| b == i as u8 + 1),
                    "record {i} torn or reordered"
                );
            }
        });
    }

    #[test]
    fn loom_fifo_without_wrap() {
        record_round_trip::<16, 0>(2, 5);
    }

    #[test]
    fn loom_fifo_across_wrap() {
        // 3-byte records in an 8-byte ring force the end marker and the
        // consumer-side jump to the base.
        record_round_trip::<8, 0>(3, 3);
    }

    #[test]
    fn loom_deletion_handshake() {
        loom::model(|| {
            let (mut tx, mut rx) = staging_buffer::<16, 0>(0).expect("allocation");

            let producer = thread::spawn(move || {
                let mut r = tx.reserve(4);
                r.fill(7);
                r.commit();
                // Drop marks the ring for deletion.
            });

            let consumer = thread::spawn(move || {
                loop {
                    let bytes = rx.peek().to_vec();
                    if !bytes.is_empty() {
                        assert!(bytes.iter().all(|&b| b == 7));
                        rx.consume(bytes.len());
                    } else if rx.can_delete() {
                        break;
                    } else {
                        thread::yield_now();
                    }
                }
            });

            producer.join().unwrap();
            consumer.join().unwrap();
        });
    }
}
