//! Build-time configuration for the staging rings.

use crate::staging::{Consumer, Producer};

/// Byte size of the per-thread staging ring that decouples a producer
/// logging thread from the background consumer thread. Large enough to
/// absorb bursts; a producer that outruns the consumer for longer than
/// this many bytes blocks in `reserve`.
pub const STAGING_BUFFER_SIZE: usize = 1 << 20;

/// Width of one cache line on every target we deploy to. Used as the
/// non-zero spacer between the producer- and consumer-owned words of a
/// ring record.
pub const CACHE_LINE: usize = 64;

/// Size of the fixed records the deque baseline stores and the benchmarks
/// push (15 payload bytes + NUL, the shape of a typical encoded log
/// statement header).
pub const DEFAULT_RECORD_BYTES: usize = 16;

/// Producer handle with the default capacity and cache-line spacer.
pub type DefaultProducer = Producer<STAGING_BUFFER_SIZE, CACHE_LINE>;

/// Consumer handle with the default capacity and cache-line spacer.
pub type DefaultConsumer = Consumer<STAGING_BUFFER_SIZE, CACHE_LINE>;
