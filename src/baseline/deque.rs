//! Deque-of-records staging buffer.
//!
//! Sidesteps the byte-ring bookkeeping entirely: records are fixed-size
//! arrays in a `VecDeque` behind a mutex, with condvars for backpressure
//! in both directions. Costs a copy per record on each side and gives up
//! variable-length records, which is what the byte rings exist to provide.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Bounded queue of `RECORD`-byte records with blocking push and pop.
///
/// Capacity is `CAP / RECORD` records, matching the byte capacity of the
/// ring variants.
pub struct DequeBuffer<const CAP: usize, const RECORD: usize> {
    inner: Mutex<VecDeque<[u8; RECORD]>>,
    /// Signalled after a pop frees a slot.
    consumed_some: Condvar,
    /// Signalled after a push queues a record.
    produced_some: Condvar,
    id: u32,
}

impl<const CAP: usize, const RECORD: usize> DequeBuffer<CAP, RECORD> {
    /// Record slots available before `push` blocks.
    pub const MAX_RECORDS: usize = {
        assert!(RECORD > 0, "record size must be non-zero");
        assert!(CAP >= RECORD, "capacity below one record");
        CAP / RECORD
    };

    pub fn new(id: u32) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(Self::MAX_RECORDS)),
            consumed_some: Condvar::new(),
            produced_some: Condvar::new(),
            id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<[u8; RECORD]>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues one record, waiting for a free slot when full. `data` is
    /// copied into the first bytes of the record; the rest is zeroed.
    pub fn push(&self, data: &[u8]) {
        debug_assert!(data.len() <= RECORD, "record overflow: {} bytes", data.len());

        let mut record = [0u8; RECORD];
        record[..data.len()].copy_from_slice(data);

        let mut queue = self.lock();
        while queue.len() >= Self::MAX_RECORDS {
            queue = self
                .consumed_some
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        queue.push_back(record);
        drop(queue);
        self.produced_some.notify_one();
    }

    /// Buffered payload in bytes.
    pub fn readable_bytes(&self) -> usize {
        self.lock().len() * RECORD
    }

    /// Removes and returns the oldest record, waiting while empty.
    pub fn pop(&self) -> [u8; RECORD] {
        let mut queue = self.lock();
        loop {
            if let Some(record) = queue.pop_front() {
                drop(queue);
                self.consumed_some.notify_all();
                return record;
            }
            queue = self
                .produced_some
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn records_come_out_in_order() {
        let buf: DequeBuffer<64, 16> = DequeBuffer::new(2);
        assert_eq!(DequeBuffer::<64, 16>::MAX_RECORDS, 4);

        buf.push(b"first");
        buf.push(b"second");
        assert_eq!(buf.readable_bytes(), 32);

        let record = buf.pop();
        assert_eq!(&record[..5], b"first");
        assert_eq!(&record[5..], &[0u8; 11]);
        assert_eq!(&buf.pop()[..6], b"second");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn push_blocks_while_full() {
        const RECORDS: u64 = 5_000;

        // Four slots force constant producer blocking.
        let buf: Arc<DequeBuffer<64, 16>> = Arc::new(DequeBuffer::new(0));
        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for i in 0..RECORDS {
                    buf.push(&i.to_le_bytes());
                }
            })
        };

        for i in 0..RECORDS {
            let record = buf.pop();
            assert_eq!(u64::from_le_bytes(record[..8].try_into().unwrap()), i);
        }
        producer.join().unwrap();
    }
}
