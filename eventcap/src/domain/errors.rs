//! Structured error types for eventcap
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! None of these ever reach instrumented code: the report path absorbs every
//! failure into counters. They surface only at startup and on the consumer side.

use super::types::BufferId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BufferError {
    #[error("Invalid ring buffer capacity {0}: must be a positive power of two")]
    InvalidCapacity(usize),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Buffer {0} is already registered")]
    DuplicateBuffer(BufferId),

    #[error("Buffer {0} is not registered")]
    UnknownBuffer(BufferId),

    #[error("A global buffer registry is already installed")]
    AlreadyInstalled,

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("buffer_capacity {0} is not a positive power of two")]
    InvalidCapacity(usize),

    #[error("truncation_limit must be greater than zero")]
    ZeroTruncationLimit,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
