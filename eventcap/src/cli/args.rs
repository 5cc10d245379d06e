//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::buffer::OverflowStrategy;
use crate::config::{RuntimeConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_TRUNCATION_LIMIT};

#[derive(Parser, Debug)]
#[command(
    name = "eventcap",
    about = "Drive the event capture runtime with concurrent synthetic call chains",
    after_help = "\
EXAMPLES:
    eventcap                                      8 writers, default buffer
    eventcap --writers 16 --capacity 1024         Small buffer, watch drops
    eventcap --overflow block --timeout-ms 50     Writers wait for the drainer
    eventcap --export trace.json                  Write a Chrome trace"
)]
pub struct Args {
    /// Concurrent writer threads, each with its own context
    #[arg(short, long, default_value_t = 8)]
    pub writers: usize,

    /// Top-level call chains reported per writer
    #[arg(short, long, default_value_t = 1000)]
    pub events: usize,

    /// Nested calls per chain
    #[arg(long, default_value_t = 3)]
    pub depth: usize,

    /// Ring buffer capacity in slots (power of two)
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
    pub capacity: usize,

    /// Behavior when the buffer is full
    #[arg(long, value_enum, default_value_t = OverflowArg::DropOldest)]
    pub overflow: OverflowArg,

    /// Wait bound for blocked writers (only with --overflow block)
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Captured values larger than this many bytes are summarized
    #[arg(long, default_value_t = DEFAULT_TRUNCATION_LIMIT)]
    pub truncation_limit: usize,

    /// Records per drainer read
    #[arg(long, default_value_t = 1024)]
    pub batch_size: usize,

    /// Start every context disabled (measures the no-op path)
    #[arg(long)]
    pub disabled: bool,

    /// Export drained records as a Chrome trace
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Overflow strategy as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverflowArg {
    DropOldest,
    DropNewest,
    Block,
}

impl From<OverflowArg> for OverflowStrategy {
    fn from(arg: OverflowArg) -> Self {
        match arg {
            OverflowArg::DropOldest => OverflowStrategy::DropOldest,
            OverflowArg::DropNewest => OverflowStrategy::DropNewest,
            OverflowArg::Block => OverflowStrategy::Block,
        }
    }
}

impl Args {
    /// Runtime configuration described by these arguments
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            default_overflow_strategy: self.overflow.into(),
            buffer_capacity: self.capacity,
            truncation_limit: self.truncation_limit,
            default_enabled: !self.disabled,
            block_timeout_ms: self.timeout_ms,
        }
    }
}
