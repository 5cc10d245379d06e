//! Capture buffers
//!
//! - [`ring_buffer`]: the bounded MPSC queue every report ends up in
//! - [`registry`]: startup-time mapping from buffer names to shared buffers

pub mod registry;
pub mod ring_buffer;

pub use registry::{global, install_global, BufferRegistry, RegistryBuilder};
pub use ring_buffer::{Batch, BufferStats, OverflowStrategy, RingBuffer, WriteOutcome};
