//! Producer-side counters for one staging ring.
//!
//! The counters are private to the producer thread and carry no
//! synchronization; a reporting thread reads them as a snapshot the
//! producer hands over. The cheap counts (allocations, slow-path entries)
//! are always maintained. Blocked-cycle accounting and the blocked-duration
//! histogram cost two timestamp reads per slow-path entry and are compiled
//! in only with the `perf-stats` feature.

/// Number of bins in the blocked-duration histogram.
pub const BLOCKED_BINS: usize = 20;

/// Width of one histogram bin in nanoseconds. The last bin absorbs every
/// longer stall.
pub const BLOCKED_BIN_NS: u64 = 10;

/// Counters a producer maintains while recording into its ring.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProducerStats {
    /// Reservations requested (fast path and slow path alike).
    pub allocations: u64,
    /// Slow-path entries while waiting for free space. Also counts
    /// entries that found space on the first probe, so this is an upper
    /// bound on true blocking events.
    pub blocked_events: u32,
    /// Cycles spent in the slow path, summed over all entries.
    #[cfg(feature = "perf-stats")]
    pub blocked_cycles: u64,
    /// Distribution of slow-path stall durations.
    #[cfg(feature = "perf-stats")]
    pub blocked_dist: BlockedHistogram,
}

/// Fixed histogram of producer stall durations in [`BLOCKED_BIN_NS`]
/// increments; the final bin saturates.
#[cfg(feature = "perf-stats")]
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockedHistogram {
    bins: [u32; BLOCKED_BINS],
}

#[cfg(feature = "perf-stats")]
impl BlockedHistogram {
    /// Buckets one stall of `blocked_cycles`. `cycles_per_bin` is the
    /// cycle count of one [`BLOCKED_BIN_NS`] step, cached by the caller so
    /// the hot path avoids a float conversion.
    #[inline]
    pub fn record(&mut self, blocked_cycles: u64, cycles_per_bin: u64) {
        debug_assert!(cycles_per_bin > 0);
        let bin = (blocked_cycles / cycles_per_bin).min(BLOCKED_BINS as u64 - 1) as usize;
        self.bins[bin] = self.bins[bin].saturating_add(1);
    }

    /// Bin counts, index `i` covering `[i * 10ns, (i + 1) * 10ns)` and the
    /// last bin everything beyond.
    pub fn bins(&self) -> &[u32; BLOCKED_BINS] {
        &self.bins
    }

    /// Total stalls recorded.
    pub fn total(&self) -> u64 {
        self.bins.iter().map(|&c| u64::from(c)).sum()
    }
}
