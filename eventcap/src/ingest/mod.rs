//! Report ingestion: record construction, truncation and buffering

pub mod ingestor;
pub mod truncation;

pub use ingestor::{monotonic_now_ns, EventDraft, IngestStats, Ingestor};
pub use truncation::{encoded_size, truncate_captured, truncate_payload};
