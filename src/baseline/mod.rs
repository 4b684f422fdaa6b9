//! Lock-based staging buffers kept as baselines for the lock-free ring.
//!
//! All of these satisfy the same byte-FIFO contract as the staging ring
//! (bytes come out in push order, a push is all-or-nothing, the reader
//! sees one contiguous region at a time) but pay for a lock or a condvar
//! round trip on every operation. The benchmarks run them side by side
//! with [`crate::staging`] to show what the reserve/commit protocol buys.
//!
//! # Module map
//! - `bounded`: the unsynchronized circular byte queue the lock-based
//!   variants wrap.
//! - `monitor`: one mutex around every operation; non-blocking push.
//! - `spinlock`: the same ring under a test-and-set spin lock.
//! - `signal`: mutex plus condvars; push blocks for space, pop for data.
//! - `deque`: `VecDeque` of fixed-size records behind a mutex and
//!   condvars.

mod bounded;
pub mod deque;
pub mod monitor;
pub mod signal;
pub mod spinlock;

pub(crate) use bounded::BoundedBytes;
pub use deque::DequeBuffer;
pub use monitor::MonitorBuffer;
pub use signal::SignalBuffer;
pub use spinlock::SpinBuffer;
