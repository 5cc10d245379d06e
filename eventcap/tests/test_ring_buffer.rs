use eventcap::buffer::{BufferStats, OverflowStrategy, RingBuffer, WriteOutcome};
use eventcap_common::{Captured, CorrelationId, EventRecord, Payload};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WRITERS: u64 = 8;
const PER_WRITER: u64 = 1000;

/// Record tagged with its writer and per-writer sequence number
fn tagged(writer: u64, seq: u64) -> EventRecord {
    EventRecord::new(
        seq,
        CorrelationId(writer * 1_000_000 + seq + 1),
        Payload::Custom { name: "load".to_string(), data: Captured::from(json!([writer, seq])) },
    )
}

fn tag_of(record: &EventRecord) -> (u64, u64) {
    let id = record.correlation_id.0 - 1;
    (id / 1_000_000, id % 1_000_000)
}

fn write_concurrently(buffer: &RingBuffer) {
    thread::scope(|s| {
        for writer in 0..WRITERS {
            s.spawn(move || {
                for seq in 0..PER_WRITER {
                    buffer.write(tagged(writer, seq));
                }
            });
        }
    });
}

/// No duplicates, and each writer's records appear in its write order
fn assert_consistent(records: &[EventRecord]) {
    let mut seen = HashSet::new();
    let mut last_seq = vec![None::<u64>; usize::try_from(WRITERS).unwrap()];
    for record in records {
        let (writer, seq) = tag_of(record);
        assert!(seen.insert((writer, seq)), "duplicate record {writer}/{seq}");
        let last = &mut last_seq[usize::try_from(writer).unwrap()];
        if let Some(prev) = *last {
            assert!(seq > prev, "writer {writer} out of order: {seq} after {prev}");
        }
        *last = Some(seq);
    }
}

#[test]
fn test_concurrent_writers_large_buffer_loses_nothing() {
    let buffer = RingBuffer::new(16_384, OverflowStrategy::DropOldest).unwrap();
    write_concurrently(&buffer);

    let batch = buffer.read_batch(0, 16_384);
    assert_eq!(batch.records.len() as u64, WRITERS * PER_WRITER);
    assert_consistent(&batch.records);

    let stats = buffer.stats();
    assert_eq!(stats.total_writes, WRITERS * PER_WRITER);
    assert_eq!(stats.total_drops, 0);
}

#[test]
fn test_concurrent_writers_drop_newest_accounts_for_every_write() {
    let buffer = RingBuffer::new(1024, OverflowStrategy::DropNewest).unwrap();
    write_concurrently(&buffer);

    let stats = buffer.stats();
    let batch = buffer.read_batch(0, 8192);
    assert_eq!(batch.records.len(), 1024);
    assert_eq!(stats.total_drops, WRITERS * PER_WRITER - 1024);
    assert_eq!(stats.total_writes, 1024);
    assert_consistent(&batch.records);
}

#[test]
fn test_concurrent_writers_drop_oldest_keeps_a_consistent_tail() {
    let buffer = RingBuffer::new(1024, OverflowStrategy::DropOldest).unwrap();
    write_concurrently(&buffer);

    let stats = buffer.stats();
    assert_eq!(stats.total_writes, WRITERS * PER_WRITER);
    assert_eq!(stats.total_drops, WRITERS * PER_WRITER - 1024);

    let batch = buffer.read_batch(0, 8192);
    assert_eq!(batch.records.len(), 1024);
    assert_eq!(batch.next_position, WRITERS * PER_WRITER);
    assert_consistent(&batch.records);
}

#[test]
fn test_concurrent_reader_sees_writes_in_order() {
    let buffer = Arc::new(RingBuffer::new(64, OverflowStrategy::Block).unwrap());
    let writer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            for seq in 0..PER_WRITER {
                assert_eq!(buffer.write(tagged(0, seq)), WriteOutcome::Written);
            }
        })
    };

    let mut received = Vec::new();
    let mut position = 0;
    while received.len() < usize::try_from(PER_WRITER).unwrap() {
        let batch = buffer.read_batch(position, 16);
        position = batch.next_position;
        if batch.records.is_empty() {
            thread::sleep(Duration::from_micros(100));
        }
        received.extend(batch.records);
    }
    writer.join().unwrap();

    assert_consistent(&received);
    assert_eq!(buffer.stats().total_drops, 0);
}

/// Write from all writers while one reader drains in `capacity`-sized batches
fn drain_while_writing(buffer: &RingBuffer) -> (Vec<EventRecord>, BufferStats) {
    let finished = AtomicU64::new(0);
    let mut received = Vec::new();

    thread::scope(|s| {
        for writer in 0..WRITERS {
            let finished = &finished;
            s.spawn(move || {
                for seq in 0..PER_WRITER {
                    buffer.write(tagged(writer, seq));
                }
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut position = 0;
        loop {
            let done = finished.load(Ordering::SeqCst) == WRITERS;
            let batch = buffer.read_batch(position, buffer.capacity());
            position = batch.next_position;
            let caught_up = batch.records.is_empty();
            received.extend(batch.records);
            if done && caught_up {
                break;
            }
        }
    });

    (received, buffer.stats())
}

#[test]
fn test_drop_oldest_with_concurrent_reader_accounts_for_every_write() {
    for capacity in [8, 64] {
        for round in 0..50 {
            let buffer = RingBuffer::new(capacity, OverflowStrategy::DropOldest).unwrap();
            let (received, stats) = drain_while_writing(&buffer);

            assert_consistent(&received);
            assert_eq!(
                received.len() as u64 + stats.total_drops,
                WRITERS * PER_WRITER,
                "capacity {capacity} round {round}: received={} drops={}",
                received.len(),
                stats.total_drops
            );
            assert_eq!(stats.total_reads, received.len() as u64);
        }
    }
}

#[test]
fn test_drop_newest_with_concurrent_reader_accounts_for_every_write() {
    let buffer = RingBuffer::new(64, OverflowStrategy::DropNewest).unwrap();
    let (received, stats) = drain_while_writing(&buffer);

    assert_consistent(&received);
    assert_eq!(received.len() as u64 + stats.total_drops, WRITERS * PER_WRITER);
    assert_eq!(stats.total_writes, received.len() as u64);
}
