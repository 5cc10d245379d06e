//! Command-line interface of the `eventcap` load driver

pub mod args;

pub use args::{Args, OverflowArg};
