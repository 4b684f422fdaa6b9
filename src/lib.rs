//! Per-producer staging byte rings for a low-latency logging pipeline.
//!
//! Every thread that logs owns one staging ring; a single background
//! thread drains all of them toward compression and output. The producer
//! side must cost nanoseconds, since it runs inside the application's hot
//! loops, while the consumer side may take its time. The ring that makes
//! that split work is [`staging`]:
//!
//! - `reserve(n)` hands the producer `n` contiguous writable bytes on a
//!   fast path with no atomic operations at all, by spending a cached
//!   lower bound on free space before ever looking at the consumer's
//!   position.
//! - Dropping (committing) the reservation publishes the bytes behind a
//!   release fence; the consumer's `peek`/`consume` pair observes them
//!   behind the matching acquire and releases them piece-wise.
//! - Reservations never split across the wrap: the producer plants an
//!   end-of-recorded-space marker and resumes at the base, and the
//!   consumer jumps the marker on its next peek.
//! - Producer-published and consumer-published words are separated by a
//!   configurable spacer (zero or one cache line) so the two threads do
//!   not false-share.
//!
//! The [`baseline`] module keeps the simpler designs (monitor mutex,
//! spin lock, condvar signalling, deque-of-records) behind the same
//! byte-FIFO contract, as the comparison points the benchmarks run.
//!
//! # Example
//!
//! ```
//! use logstage::staging_buffer;
//!
//! let (mut tx, mut rx) = staging_buffer::<1024, 64>(0)?;
//!
//! let mut span = tx.reserve(5);
//! span.copy_from_slice(b"hello");
//! span.commit();
//!
//! let bytes = rx.peek().to_vec();
//! assert_eq!(bytes, b"hello");
//! rx.consume(bytes.len());
//! # Ok::<(), logstage::AllocError>(())
//! ```

pub mod baseline;
pub mod config;
#[cfg(feature = "perf-stats")]
pub mod cycles;
pub mod fence;
pub mod staging;
pub mod stats;

#[cfg(test)]
pub mod test_utils;

pub use config::{CACHE_LINE, STAGING_BUFFER_SIZE};
pub use staging::{staging_buffer, AllocError, Consumer, Producer, Reservation};
pub use stats::ProducerStats;
