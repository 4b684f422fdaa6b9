//! Cycle-counter access for the blocked-time statistics.
//!
//! Reads the hardware timestamp counter directly (TSC on x86-64, the
//! virtual counter on aarch64) so the producer slow path can bound its
//! stall without a syscall. Counts-per-second is calibrated once per
//! process against the monotonic clock; the 10 ns histogram bin width is
//! derived from it at ring construction.

use std::sync::OnceLock;
use std::time::Instant;

/// Reads the current cycle counter.
///
/// Values are only meaningful as differences on the same core; the caller
/// (the producer slow path) subtracts two reads taken on one thread.
#[inline(always)]
pub fn rdtsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: RDTSC is unprivileged and has no preconditions.
    unsafe {
        core::arch::x86_64::_rdtsc()
    }

    #[cfg(target_arch = "aarch64")]
    {
        let ticks: u64;
        // SAFETY: CNTVCT_EL0 is readable from user space on the platforms
        // we run on.
        unsafe {
            core::arch::asm!(
                "mrs {}, cntvct_el0",
                out(reg) ticks,
                options(nomem, nostack, preserves_flags)
            );
        }
        ticks
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        static BASE: OnceLock<Instant> = OnceLock::new();
        BASE.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

/// Counter increments per second, calibrated once per process.
///
/// The first call busy-samples the counter against the monotonic clock
/// for a few milliseconds; later calls return the cached value.
pub fn per_second() -> u64 {
    static PER_SECOND: OnceLock<u64> = OnceLock::new();
    *PER_SECOND.get_or_init(calibrate)
}

/// Converts a nanosecond duration to counter increments, rounding down.
/// May return 0 for durations shorter than one increment; callers that
/// divide by the result clamp it to at least 1.
pub fn from_nanoseconds(ns: u64) -> u64 {
    (per_second() as u128 * ns as u128 / 1_000_000_000) as u64
}

/// Converts a counter difference to seconds.
pub fn to_seconds(cycles: u64) -> f64 {
    cycles as f64 / per_second() as f64
}

fn calibrate() -> u64 {
    const SAMPLE_NS: u64 = 5_000_000;

    let started_at = Instant::now();
    let first = rdtsc();
    let mut elapsed = started_at.elapsed();
    while (elapsed.as_nanos() as u64) < SAMPLE_NS {
        core::hint::spin_loop();
        elapsed = started_at.elapsed();
    }
    let ticks = rdtsc().wrapping_sub(first);

    // A counter that moved slower than the sample window still yields a
    // non-zero rate so histogram bin math never divides by zero.
    (ticks as u128 * 1_000_000_000 / elapsed.as_nanos().max(1)).max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_monotonic_enough() {
        let a = rdtsc();
        let b = rdtsc();
        assert!(b >= a, "counter went backwards on one thread: {b} < {a}");
    }

    #[test]
    fn calibration_is_plausible() {
        let rate = per_second();
        // Anything from a 1 MHz platform timer to a 10 GHz TSC.
        assert!(rate >= 1_000_000, "rate {rate} implausibly low");
        assert!(rate <= 10_000_000_000, "rate {rate} implausibly high");

        assert_eq!(per_second(), rate, "calibration must be cached");
        assert!(to_seconds(rate) > 0.9 && to_seconds(rate) < 1.1);
    }

    #[test]
    fn nanosecond_conversion_round_trips() {
        let one_ms = from_nanoseconds(1_000_000);
        let secs = to_seconds(one_ms);
        assert!(secs > 0.0009 && secs < 0.0011, "1 ms mapped to {secs} s");
    }
}
