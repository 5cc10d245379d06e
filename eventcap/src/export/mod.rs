//! Trace export
//!
//! Turns drained event records into files other tools can open. Currently
//! supports the Chrome Trace Event Format, viewable in chrome://tracing or
//! Perfetto.

pub mod chrome_trace;

pub use chrome_trace::ChromeTraceExporter;
