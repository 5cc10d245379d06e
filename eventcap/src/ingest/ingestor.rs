//! # Event Ingestion
//!
//! Turns the raw inputs of one report call into an [`EventRecord`] and
//! performs exactly one [`RingBuffer::write`].
//!
//! ## Contract
//!
//! The ingestion path never fails its caller. Whatever the buffer answers
//! (`Rejected`, `TimedOut`), [`Ingestor::ingest`] still hands back the
//! correlation id; the failure only shows up in [`IngestStats`].
//!
//! ## Pipeline
//!
//! ```text
//! EventDraft ──► assign correlation id ──► truncate oversized value ──► stamp time ──► write
//! ```

use eventcap_common::{AstNodeId, CorrelationId, EventRecord, Payload};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use super::truncation::truncate_payload;
use crate::buffer::{RingBuffer, WriteOutcome};
use crate::config::RuntimeConfig;

/// Raw inputs of one report call, before ingestion
#[derive(Debug, Clone)]
pub struct EventDraft {
    /// Chain to attach to; `None` starts a new one
    pub correlation_id: Option<CorrelationId>,
    pub ast_node_id: Option<AstNodeId>,
    pub payload: Payload,
}

impl EventDraft {
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self { correlation_id: None, ast_node_id: None, payload }
    }

    #[must_use]
    pub fn correlation_id(mut self, id: Option<CorrelationId>) -> Self {
        self.correlation_id = id.filter(|id| !id.is_none());
        self
    }

    #[must_use]
    pub fn ast_node_id(mut self, id: Option<AstNodeId>) -> Self {
        self.ast_node_id = id;
        self
    }
}

/// Ingestion counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IngestStats {
    /// Report calls that reached the buffer
    pub ingested: u64,
    /// Records whose captured value was summarized
    pub truncated: u64,
    /// Writes the buffer refused or timed out on
    pub failed_writes: u64,
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ingested={} truncated={} failed_writes={}",
            self.ingested, self.truncated, self.failed_writes
        )
    }
}

/// Builds records and submits them, absorbing every write failure
#[derive(Debug)]
pub struct Ingestor {
    truncation_limit: usize,
    ingested: AtomicU64,
    truncated: AtomicU64,
    failed_writes: AtomicU64,
}

impl Ingestor {
    #[must_use]
    pub fn new(truncation_limit: usize) -> Self {
        Self {
            truncation_limit,
            ingested: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.truncation_limit)
    }

    #[must_use]
    pub fn truncation_limit(&self) -> usize {
        self.truncation_limit
    }

    /// Record `draft` into `buffer`
    ///
    /// Returns the correlation id the record was filed under: the draft's own,
    /// or a freshly issued one. The result never reflects whether the write
    /// succeeded.
    pub fn ingest(&self, buffer: &RingBuffer, draft: EventDraft) -> CorrelationId {
        let EventDraft { correlation_id, ast_node_id, mut payload } = draft;
        let correlation_id = correlation_id.unwrap_or_else(CorrelationId::next);

        let truncated = truncate_payload(&mut payload, self.truncation_limit);
        if truncated {
            self.truncated.fetch_add(1, Ordering::Relaxed);
        }

        let mut record = EventRecord::new(monotonic_now_ns(), correlation_id, payload)
            .with_ast_node_id(ast_node_id);
        record.truncated = truncated;

        self.ingested.fetch_add(1, Ordering::Relaxed);
        match buffer.write(record) {
            WriteOutcome::Written | WriteOutcome::Overwrote => {}
            WriteOutcome::Rejected | WriteOutcome::TimedOut => {
                self.failed_writes.fetch_add(1, Ordering::Relaxed);
            }
        }
        correlation_id
    }

    #[must_use]
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            ingested: self.ingested.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
        }
    }
}

/// Nanoseconds since the first call in this process (monotonic)
#[must_use]
pub fn monotonic_now_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
