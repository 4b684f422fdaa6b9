//! End-to-end exercises of the staging ring through the public surface.

use crossbeam_utils::Backoff;
use std::thread;

use logstage::config::{DefaultConsumer, DefaultProducer};
use logstage::{staging_buffer, Consumer, Producer};

/// Reserve-write-commit in one step.
fn push<const CAP: usize, const GAP: usize>(tx: &mut Producer<CAP, GAP>, data: &[u8]) {
    let mut span = tx.reserve(data.len());
    span.copy_from_slice(data);
    span.commit();
}

/// Drain everything currently readable into `out`.
fn drain<const CAP: usize, const GAP: usize>(rx: &mut Consumer<CAP, GAP>, out: &mut Vec<u8>) {
    loop {
        let bytes = rx.peek().to_vec();
        if bytes.is_empty() {
            return;
        }
        out.extend_from_slice(&bytes);
        rx.consume(bytes.len());
    }
}

#[test]
fn default_sized_ring_round_trips() {
    let (mut tx, mut rx): (DefaultProducer, DefaultConsumer) =
        staging_buffer(42).expect("1 MiB allocation");
    assert_eq!(tx.capacity(), logstage::STAGING_BUFFER_SIZE);

    for i in 0..1_000u32 {
        push(&mut tx, &i.to_le_bytes());
    }

    let mut received = Vec::new();
    drain(&mut rx, &mut received);
    assert_eq!(received.len(), 4_000);
    for (i, chunk) in received.chunks_exact(4).enumerate() {
        assert_eq!(u32::from_le_bytes(chunk.try_into().unwrap()), i as u32);
    }
}

#[test]
fn repeated_wraps_preserve_order() {
    // 24-byte records in a 256-byte ring wrap every few records.
    let (mut tx, mut rx) = staging_buffer::<256, 64>(0).expect("allocation");
    let mut expected = Vec::new();
    let mut received = Vec::new();

    for round in 0..200u8 {
        let record = [round; 24];
        match tx.try_reserve(24) {
            Some(mut span) => {
                span.copy_from_slice(&record);
                span.commit();
                expected.extend_from_slice(&record);
            }
            None => drain(&mut rx, &mut received),
        }
    }
    drain(&mut rx, &mut received);

    assert_eq!(received, expected);
}

/// One consumer thread drains many rings and reclaims each as its
/// producer exits, the shape of the background thread this crate feeds.
#[test]
fn drain_loop_reclaims_finished_rings() {
    const PRODUCERS: usize = 4;
    const RECORDS: u64 = 5_000;

    let mut consumers = Vec::new();
    let mut workers = Vec::new();

    for id in 0..PRODUCERS {
        let (mut tx, rx) = staging_buffer::<2048, 64>(id as u32).expect("allocation");
        consumers.push(rx);
        workers.push(thread::spawn(move || {
            for i in 0..RECORDS {
                let mut record = [0u8; 16];
                record[..8].copy_from_slice(&(id as u64).to_le_bytes());
                record[8..].copy_from_slice(&i.to_le_bytes());
                let mut span = tx.reserve(16);
                span.copy_from_slice(&record);
                span.commit();
            }
        }));
    }

    let drained = thread::spawn(move || {
        let mut per_ring: Vec<Vec<u8>> = vec![Vec::new(); PRODUCERS];
        let backoff = Backoff::new();
        while !consumers.is_empty() {
            let mut progressed = false;
            consumers.retain_mut(|rx| {
                let bytes = rx.peek().to_vec();
                if !bytes.is_empty() {
                    per_ring[rx.id() as usize].extend_from_slice(&bytes);
                    rx.consume(bytes.len());
                    progressed = true;
                    return true;
                }
                // Empty and abandoned: drop the handle, reclaiming the
                // ring.
                !rx.can_delete()
            });
            if progressed {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        per_ring
    });

    for worker in workers {
        worker.join().unwrap();
    }
    let per_ring = drained.join().unwrap();

    for (id, bytes) in per_ring.iter().enumerate() {
        assert_eq!(bytes.len() as u64, RECORDS * 16, "ring {id} lost records");
        for (i, record) in bytes.chunks_exact(16).enumerate() {
            assert_eq!(
                u64::from_le_bytes(record[..8].try_into().unwrap()),
                id as u64
            );
            assert_eq!(
                u64::from_le_bytes(record[8..].try_into().unwrap()),
                i as u64
            );
        }
    }
}

#[test]
fn consumer_backpressure_blocks_and_releases() {
    let (mut tx, mut rx) = staging_buffer::<128, 64>(0).expect("allocation");

    let producer = thread::spawn(move || {
        // 64 pushes of 16 bytes cannot fit at once; the producer must ride
        // the consumer.
        for i in 0..64u8 {
            let mut span = tx.reserve(16);
            span.fill(i);
            span.commit();
        }
        tx.stats()
    });

    let mut received = Vec::new();
    let backoff = Backoff::new();
    while received.len() < 64 * 16 {
        let bytes = rx.peek().to_vec();
        if bytes.is_empty() {
            backoff.snooze();
            continue;
        }
        received.extend_from_slice(&bytes);
        rx.consume(bytes.len());
        backoff.reset();
    }

    let stats = producer.join().unwrap();
    assert_eq!(stats.allocations, 64);
    assert!(stats.blocked_events >= 1, "a 128-byte ring must have blocked");

    for (i, record) in received.chunks_exact(16).enumerate() {
        assert!(record.iter().all(|&b| b == i as u8), "record {i} corrupted");
    }
}
