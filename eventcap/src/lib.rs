//! # eventcap - Low-Overhead Runtime Event Capture
//!
//! eventcap records what instrumented code does while it runs (function
//! entries and exits, variable snapshots, exceptions, framework events) and
//! makes those records available to a consumer, without ever slowing down or
//! breaking the code being observed.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Instrumented Program                         │
//! │        (many execution units, each with its own Context)        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ report_entry / report_exit / report_*
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eventcap (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Runtime    │──▶│   Ingestor   │──▶│  RingBuffer  │         │
//! │  │   (facade)   │   │ (ids, trunc) │   │   (MPSC)     │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │         │                                     │                 │
//! │         ▼                                     ▼                 │
//! │  ┌──────────────┐                     ┌──────────────┐          │
//! │  │   Context    │                     │   Drainer    │          │
//! │  │ (call stack) │                     │  (consumer)  │          │
//! │  └──────────────┘                     └──────┬───────┘          │
//! │                                              ▼                  │
//! │                                       ┌──────────────┐          │
//! │                                       │    Export    │          │
//! │                                       │ (trace.json) │          │
//! │                                       └──────────────┘          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Capture Path
//!
//! - [`runtime`]: The `report_*` entry points instrumented code calls
//! - [`context`]: Per-execution-unit state (enabled flag, call stack, buffer)
//! - [`ingest`]: Record construction, correlation ids, payload truncation
//! - [`buffer`]: Bounded multi-producer ring buffer and the buffer registry
//!
//! ### Consumer Side
//!
//! - [`drain`]: Single reader that pulls batches off a buffer
//! - [`export`]: Chrome Trace Event Format output
//!
//! ### Support
//!
//! - [`config`]: Runtime configuration and defaults
//! - [`domain`]: Buffer ids, durations and error types
//! - [`cli`]: Arguments of the `eventcap` load driver
//! - [`workload`]: Synthetic call chains used by the load driver
//!
//! ## Guarantees
//!
//! - A report call never panics and never returns an error to its caller
//! - A disabled context makes every report call a no-op that touches no buffer
//! - Records are published whole: a reader sees all of a record or none of it
//! - Memory is bounded: buffer capacity is fixed and oversized payloads are
//!   replaced by a summary
//!
//! ## Typical Usage
//!
//! ```no_run
//! use eventcap::config::RuntimeConfig;
//! use eventcap::runtime::Runtime;
//! use serde_json::json;
//!
//! let runtime = Runtime::from_config(RuntimeConfig::default()).unwrap();
//! let mut context = runtime.context();
//!
//! let id = runtime.report_entry(&mut context, "shop", "checkout", json!({"cart": 3}));
//! runtime.report_exit(&mut context, id, json!("ok"), 1_200);
//! ```
//!
//! ## Key Concepts
//!
//! - **Correlation id**: Token pairing an entry with its exit and grouping nested reports
//! - **Overflow strategy**: What a full buffer does with one more write
//!   (drop oldest, drop newest, or block the writer)
//! - **Truncation**: Oversized captured values become an element count and byte size

pub mod buffer;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod drain;
pub mod export;
pub mod ingest;
pub mod runtime;
pub mod workload;
