//! # Capture Ring Buffer
//!
//! Fixed-capacity, multi-producer / single-consumer queue of [`EventRecord`]s.
//! Many execution units write concurrently; exactly one drainer reads.
//!
//! ## Layout
//!
//! ```text
//!            read cursor                 write cursor
//!                 │                           │
//!                 ▼                           ▼
//!   positions:  … 12   13   14   15   16   17 │ 18 …
//!   slots:       [0]  [1]  [2]  [3]  [0]  [1]   (capacity 4, mask 3)
//! ```
//!
//! Cursors are monotonically increasing `u64` positions; a position maps to
//! slot `position & mask`. Both live on their own cache line.
//!
//! ## Publication Protocol
//!
//! 1. **Reserve**: a writer claims a position by advancing the write cursor
//!    (`fetch_add` for DropOldest, CAS for DropNewest/Block so a full buffer
//!    can refuse the reservation).
//! 2. **Fill**: the record is stored in the slot together with its position.
//! 3. **Publish**: the slot's sequence marker is raised to `position + 1`
//!    with `Release` ordering.
//!
//! A reader looking for position `p` accepts the slot only when the marker is
//! exactly `p + 1` (`Acquire`). A smaller marker means the writer has not
//! committed yet, so the batch stops there; a larger one means a later lap
//! overwrote the slot, so the position is skipped.
//!
//! Writers never exclude each other: distinct positions map to distinct slots
//! within one lap. The per-slot lock only serializes a writer with the drainer
//! (or with a writer one lap ahead under DropOldest) on the same slot, which
//! is uncontended in steady state.
//!
//! ## Overflow
//!
//! | Strategy     | Full buffer                                         | Outcome       |
//! |--------------|-----------------------------------------------------|---------------|
//! | `DropNewest` | Write refused immediately                           | `Rejected`    |
//! | `DropOldest` | Oldest unread slot overwritten, read cursor bumped  | `Overwrote`   |
//! | `Block`      | Wait for the drainer, bounded by the block timeout  | `TimedOut`    |
//!
//! Every refused, timed-out or overwritten record increments the drop counter.

use crossbeam_utils::CachePadded;
use eventcap_common::EventRecord;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::domain::BufferError;

/// Upper bound on a single condvar wait while blocked on a full buffer.
///
/// Writers re-check the cursors at least this often, so a wake-up that races
/// with a waiter registering itself costs at most one slice of latency.
const BLOCK_WAIT_SLICE: Duration = Duration::from_millis(1);

// =============================================================================
// CONFIGURATION TYPES
// =============================================================================

/// Writer behavior when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowStrategy {
    /// Overwrite the oldest unread record
    #[default]
    DropOldest,
    /// Refuse the incoming record
    DropNewest,
    /// Wait for space, optionally bounded by a timeout
    Block,
}

impl fmt::Display for OverflowStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverflowStrategy::DropOldest => "drop-oldest",
            OverflowStrategy::DropNewest => "drop-newest",
            OverflowStrategy::Block => "block",
        };
        f.write_str(name)
    }
}

/// Result of a single [`RingBuffer::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored in a free slot
    Written,
    /// Stored, at the cost of one or more unread records (DropOldest)
    Overwrote,
    /// Buffer full, record discarded (DropNewest)
    Rejected,
    /// Buffer stayed full past the block timeout, record discarded (Block)
    TimedOut,
}

impl WriteOutcome {
    /// True when the record made it into the buffer
    #[must_use]
    pub fn is_stored(self) -> bool {
        matches!(self, WriteOutcome::Written | WriteOutcome::Overwrote)
    }
}

/// Records returned by [`RingBuffer::read_batch`]
#[derive(Debug, Default)]
pub struct Batch {
    /// Ready records in position order
    pub records: Vec<EventRecord>,
    /// Position to pass to the next `read_batch` call
    pub next_position: u64,
}

/// Monitoring snapshot of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BufferStats {
    /// Reserved but not yet consumed positions
    pub current_size: usize,
    pub capacity: usize,
    /// Positions reserved and published, including ones a lapping writer
    /// overwrote before or after they landed (those are in `total_drops` too)
    pub total_writes: u64,
    /// Records handed out by `read_batch`
    pub total_reads: u64,
    /// Records lost to overflow (rejected, timed out or overwritten)
    pub total_drops: u64,
}

impl fmt::Display for BufferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size={}/{} writes={} reads={} drops={}",
            self.current_size, self.capacity, self.total_writes, self.total_reads, self.total_drops
        )
    }
}

// =============================================================================
// SLOTS
// =============================================================================

/// One entry of the slot array.
struct Slot {
    /// `position + 1` of the last committed write, 0 if never written.
    sequence: AtomicU64,
    /// Committed record tagged with the position it was written for.
    record: Mutex<Option<(u64, EventRecord)>>,
}

impl Slot {
    fn new() -> Self {
        Self { sequence: AtomicU64::new(0), record: Mutex::new(None) }
    }

    /// Lock the record cell, recovering from poison.
    ///
    /// Nothing that runs under this lock can panic halfway through an update,
    /// so a poisoned cell still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, Option<(u64, EventRecord)>> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// RING BUFFER
// =============================================================================

/// Bounded MPSC event queue with configurable overflow behavior
///
/// Share it across writers with `Arc<RingBuffer>`. Only one execution unit
/// may call [`RingBuffer::read_batch`] at a time; that contract is not
/// checked here.
pub struct RingBuffer {
    slots: Box<[Slot]>,
    mask: u64,
    overflow_strategy: OverflowStrategy,
    /// `None` waits indefinitely under `Block`.
    block_timeout: Option<Duration>,

    /// Next position to reserve.
    write_cursor: CachePadded<AtomicU64>,
    /// Oldest position not yet consumed (or overwritten).
    read_cursor: CachePadded<AtomicU64>,
    /// End of the last batch handed out; earlier positions are re-reads.
    consumed: AtomicU64,

    total_writes: AtomicU64,
    total_reads: AtomicU64,
    total_drops: AtomicU64,

    /// Writers parked on a full buffer (Block only).
    waiters: AtomicUsize,
    space_lock: Mutex<()>,
    space_available: Condvar,
}

impl RingBuffer {
    /// Create a buffer with `capacity` slots
    ///
    /// # Errors
    ///
    /// [`BufferError::InvalidCapacity`] unless `capacity` is a positive power of two.
    pub fn new(capacity: usize, overflow_strategy: OverflowStrategy) -> Result<Self, BufferError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(BufferError::InvalidCapacity(capacity));
        }

        let slots: Box<[Slot]> = (0..capacity).map(|_| Slot::new()).collect();
        debug!("ring buffer created: capacity={capacity} overflow={overflow_strategy}");

        Ok(Self {
            slots,
            mask: capacity as u64 - 1,
            overflow_strategy,
            block_timeout: None,
            write_cursor: CachePadded::new(AtomicU64::new(0)),
            read_cursor: CachePadded::new(AtomicU64::new(0)),
            consumed: AtomicU64::new(0),
            total_writes: AtomicU64::new(0),
            total_reads: AtomicU64::new(0),
            total_drops: AtomicU64::new(0),
            waiters: AtomicUsize::new(0),
            space_lock: Mutex::new(()),
            space_available: Condvar::new(),
        })
    }

    /// Bound the wait of `Block` writers; `None` waits indefinitely
    ///
    /// Ignored by the drop strategies.
    #[must_use]
    pub fn with_block_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.block_timeout = timeout;
        self
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn overflow_strategy(&self) -> OverflowStrategy {
        self.overflow_strategy
    }

    #[must_use]
    pub fn block_timeout(&self) -> Option<Duration> {
        self.block_timeout
    }

    /// Position the next reservation will receive
    #[must_use]
    pub fn write_position(&self) -> u64 {
        self.write_cursor.load(Ordering::Acquire)
    }

    /// Reserved positions not yet consumed (snapshot, may be stale)
    #[must_use]
    pub fn len(&self) -> usize {
        let write = self.write_cursor.load(Ordering::Acquire);
        let read = self.read_cursor.load(Ordering::Acquire);
        let used = usize::try_from(write.saturating_sub(read)).unwrap_or(usize::MAX);
        used.min(self.capacity())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -------------------------------------------------------------------------
    // Writer side
    // -------------------------------------------------------------------------

    /// Append a record according to the overflow strategy
    ///
    /// Never blocks except under [`OverflowStrategy::Block`], and then only
    /// up to the block timeout.
    pub fn write(&self, record: EventRecord) -> WriteOutcome {
        match self.overflow_strategy {
            OverflowStrategy::DropOldest => self.write_overwriting(record),
            OverflowStrategy::DropNewest => match self.try_reserve() {
                Some(position) => {
                    self.publish(position, record);
                    WriteOutcome::Written
                }
                None => {
                    self.total_drops.fetch_add(1, Ordering::Relaxed);
                    WriteOutcome::Rejected
                }
            },
            OverflowStrategy::Block => self.write_blocking(record),
        }
    }

    fn write_overwriting(&self, record: EventRecord) -> WriteOutcome {
        let position = self.write_cursor.fetch_add(1, Ordering::AcqRel);
        let capacity = self.slots.len() as u64;

        let mut outcome = WriteOutcome::Written;
        if position >= capacity {
            // Everything older than one lap behind us is gone once we land.
            let oldest_retained = position + 1 - capacity;
            let previous = self.read_cursor.fetch_max(oldest_retained, Ordering::AcqRel);
            let lost = oldest_retained.saturating_sub(previous);
            if lost > 0 {
                self.total_drops.fetch_add(lost, Ordering::Relaxed);
                outcome = WriteOutcome::Overwrote;
            }
        }

        self.publish(position, record);
        outcome
    }

    fn write_blocking(&self, record: EventRecord) -> WriteOutcome {
        let deadline = self.block_timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(position) = self.try_reserve() {
                self.publish(position, record);
                return WriteOutcome::Written;
            }
            if !self.wait_for_space(deadline) {
                self.total_drops.fetch_add(1, Ordering::Relaxed);
                return WriteOutcome::TimedOut;
            }
        }
    }

    /// Claim the next position unless the buffer is full.
    fn try_reserve(&self) -> Option<u64> {
        let capacity = self.slots.len() as u64;
        let mut write = self.write_cursor.load(Ordering::Acquire);
        loop {
            let read = self.read_cursor.load(Ordering::SeqCst);
            if write.saturating_sub(read) >= capacity {
                return None;
            }
            match self.write_cursor.compare_exchange_weak(
                write,
                write + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(write),
                Err(current) => write = current,
            }
        }
    }

    fn is_full(&self) -> bool {
        let write = self.write_cursor.load(Ordering::SeqCst);
        let read = self.read_cursor.load(Ordering::SeqCst);
        write.saturating_sub(read) >= self.slots.len() as u64
    }

    /// Park until the drainer frees space. Returns false once the deadline passed.
    fn wait_for_space(&self, deadline: Option<Instant>) -> bool {
        let mut guard = self.space_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.waiters.fetch_add(1, Ordering::SeqCst);

        let has_space = loop {
            if !self.is_full() {
                break true;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break false;
                    }
                    remaining.min(BLOCK_WAIT_SLICE)
                }
                None => BLOCK_WAIT_SLICE,
            };
            guard = self
                .space_available
                .wait_timeout(guard, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        has_space
    }

    /// Fill the reserved slot, then raise its sequence marker.
    fn publish(&self, position: u64, record: EventRecord) {
        let slot = &self.slots[self.slot_index(position)];
        {
            let mut cell = slot.lock();
            // A writer one lap ahead may already have landed here (DropOldest).
            // Its record is newer, and our position was already counted as dropped.
            let superseded = matches!(&*cell, Some((current, _)) if *current > position);
            if !superseded {
                *cell = Some((position, record));
            }
        }
        slot.sequence.fetch_max(position + 1, Ordering::Release);
        self.total_writes.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn slot_index(&self, position: u64) -> usize {
        (position & self.mask) as usize
    }

    // -------------------------------------------------------------------------
    // Reader side
    // -------------------------------------------------------------------------

    /// Collect up to `max_count` published records starting at `start_position`
    ///
    /// Positions that were already overwritten are skipped; the batch ends at
    /// the write cursor or at the first reserved-but-unpublished slot,
    /// whichever comes first. Never blocks.
    ///
    /// Each unread position is claimed on the read cursor before its record
    /// is taken, which frees space for `DropNewest` and `Block` writers. A
    /// position is either claimed here or dropped by a lapping writer, never
    /// both, so `records read + total_drops` always equals the positions
    /// reserved. Positions before the end of the previous batch are handed
    /// out again if still retained; positions a caller skips by starting past
    /// the read cursor are given up without being counted.
    pub fn read_batch(&self, start_position: u64, max_count: usize) -> Batch {
        let write = self.write_cursor.load(Ordering::Acquire);
        let oldest = write.saturating_sub(self.slots.len() as u64);

        // Everything a full lap behind is gone; count what no writer counted yet
        let previous = self.read_cursor.fetch_max(oldest, Ordering::AcqRel);
        let lost = oldest.saturating_sub(previous);
        if lost > 0 {
            self.total_drops.fetch_add(lost, Ordering::Relaxed);
        }

        let mut position = start_position.clamp(oldest, write);
        let reread_below = self.consumed.load(Ordering::Acquire).min(write);
        self.read_cursor.fetch_max(position, Ordering::AcqRel);
        let mut records = Vec::with_capacity(max_count.min(self.capacity()));

        while position < write && records.len() < max_count {
            let slot = &self.slots[self.slot_index(position)];
            let sequence = slot.sequence.load(Ordering::Acquire);

            if position < reread_below {
                if sequence == position + 1 {
                    if let Some((stored, record)) = &*slot.lock() {
                        if *stored == position {
                            records.push(record.clone());
                        }
                    }
                }
                position += 1;
                continue;
            }

            let cursor = self.read_cursor.load(Ordering::Acquire);
            if cursor > position {
                // Dropped by a lapping writer
                position = cursor;
                continue;
            }
            if sequence < position + 1 {
                // Reserved, not yet committed
                break;
            }

            // Claim under the slot lock: a lapping writer has either counted
            // this position as dropped already, or waits for the lock to overwrite it
            let cell = slot.lock();
            match self.read_cursor.compare_exchange(
                position,
                position + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    match &*cell {
                        Some((stored, record)) if *stored == position => records.push(record.clone()),
                        _ => {
                            self.total_drops.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    position += 1;
                }
                // Overwritten; the writer that moved the cursor counted the drop
                Err(current) => position = current.max(position + 1),
            }
        }

        self.consumed.fetch_max(position, Ordering::Release);
        self.total_reads.fetch_add(records.len() as u64, Ordering::Relaxed);
        self.wake_blocked_writers();

        Batch { records, next_position: position }
    }

    fn wake_blocked_writers(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.space_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.space_available.notify_all();
        }
    }

    // -------------------------------------------------------------------------
    // Monitoring and lifecycle
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            current_size: self.len(),
            capacity: self.capacity(),
            total_writes: self.total_writes.load(Ordering::Relaxed),
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_drops: self.total_drops.load(Ordering::Relaxed),
        }
    }

    /// Discard every record and reset cursors and counters
    ///
    /// Must not run while any writer is active. Consumers should restart
    /// from position 0 afterwards (stale positions are clamped there anyway).
    pub fn clear(&self) {
        for slot in &*self.slots {
            *slot.lock() = None;
            slot.sequence.store(0, Ordering::Release);
        }
        self.write_cursor.store(0, Ordering::Release);
        self.read_cursor.store(0, Ordering::Release);
        self.consumed.store(0, Ordering::Release);
        self.total_writes.store(0, Ordering::Relaxed);
        self.total_reads.store(0, Ordering::Relaxed);
        self.total_drops.store(0, Ordering::Relaxed);
        self.wake_blocked_writers();
        debug!("ring buffer cleared: capacity={}", self.capacity());
    }

    /// Release the slot storage
    ///
    /// Must not run while any writer is active; holding the buffer by value
    /// means no `Arc` clone is left.
    pub fn destroy(self) {
        info!("ring buffer destroyed: {}", self.stats());
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("overflow_strategy", &self.overflow_strategy)
            .field("block_timeout", &self.block_timeout)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
