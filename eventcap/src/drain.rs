//! # Buffer Draining
//!
//! Reference consumer for a capture buffer. A [`Drainer`] owns the read
//! position of one [`RingBuffer`], pulls ready records in batches and hands
//! them downstream over a `crossbeam-channel`.
//!
//! Exactly one drainer may read a given buffer; running two against the same
//! buffer breaks the single-consumer contract of the ring.
//!
//! ## Loop
//!
//! ```text
//! read_batch ──► non-empty? ──yes──► send downstream ──┐
//!     ▲              │                                  │
//!     │              no                                 │
//!     │              ▼                                  │
//!     │        stop requested? ──yes──► return stats    │
//!     │              │                                  │
//!     │              no ──► sleep(poll interval)        │
//!     └─────────────────────────────────────────────────┘
//! ```

use crossbeam_channel::Sender;
use eventcap_common::EventRecord;
use log::{debug, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::RingBuffer;

/// Drainer counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainStats {
    /// Non-empty batches read
    pub batches: u64,
    /// Records read
    pub records: u64,
    /// Positions passed over without a record (overwritten before they were read)
    pub skipped: u64,
}

impl fmt::Display for DrainStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batches={} records={} skipped={}", self.batches, self.records, self.skipped)
    }
}

/// Single consumer of one ring buffer
pub struct Drainer {
    buffer: Arc<RingBuffer>,
    position: u64,
    batch_size: usize,
    stats: DrainStats,
}

impl Drainer {
    /// Drain `buffer` from position 0, at most `batch_size` records per read
    #[must_use]
    pub fn new(buffer: Arc<RingBuffer>, batch_size: usize) -> Self {
        Self { buffer, position: 0, batch_size: batch_size.max(1), stats: DrainStats::default() }
    }

    /// Position the next read starts from
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub fn stats(&self) -> DrainStats {
        self.stats
    }

    /// Read one batch and advance the position past it
    pub fn drain_once(&mut self) -> Vec<EventRecord> {
        let batch = self.buffer.read_batch(self.position, self.batch_size);
        let advanced = batch.next_position.saturating_sub(self.position);
        let read = batch.records.len() as u64;

        let skipped = advanced.saturating_sub(read);
        if skipped > 0 {
            warn!("drainer fell behind: {skipped} record(s) overwritten before read");
            self.stats.skipped += skipped;
        }
        if read > 0 {
            self.stats.batches += 1;
            self.stats.records += read;
        }
        self.position = batch.next_position;
        batch.records
    }

    /// Read until the buffer has nothing ready
    pub fn drain_all(&mut self) -> Vec<EventRecord> {
        let mut records = Vec::new();
        loop {
            let batch = self.drain_once();
            if batch.is_empty() {
                return records;
            }
            records.extend(batch);
        }
    }

    /// Forward batches to `sender` until `stop` is set and the buffer is empty
    ///
    /// Returns early if the receiving side hangs up.
    pub fn run(
        &mut self,
        sender: &Sender<Vec<EventRecord>>,
        poll_interval: Duration,
        stop: &AtomicBool,
    ) -> DrainStats {
        loop {
            let batch = self.drain_once();
            if !batch.is_empty() {
                if sender.send(batch).is_err() {
                    warn!("drain receiver disconnected at position {}", self.position);
                    break;
                }
                continue;
            }
            if stop.load(Ordering::Acquire) {
                break;
            }
            std::thread::sleep(poll_interval);
        }
        debug!("drainer finished: {}", self.stats);
        self.stats
    }
}
