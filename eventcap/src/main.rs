//! # eventcap - Main Entry Point
//!
//! Load driver for the capture runtime. Spawns `--writers` threads that each
//! report synthetic call chains through their own context, drains the
//! shared buffer concurrently, then prints buffer, ingestion and drain
//! statistics. With `--export` the drained records are written as a Chrome
//! trace.
//!
//! ```text
//! writer 0 ──┐
//! writer 1 ──┼──► RingBuffer ──► Drainer ──(channel)──► collector ──► trace.json
//! writer N ──┘
//! ```

// Time conversions lose precision for display
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use eventcap::buffer::{install_global, BufferRegistry};
use eventcap::cli::Args;
use eventcap::domain::{BufferId, ConfigError, DurationNs, RegistryError};
use eventcap::drain::{DrainStats, Drainer};
use eventcap::export::ChromeTraceExporter;
use eventcap::runtime::Runtime;
use eventcap::workload::{run_writer, WorkloadShape};
use eventcap_common::EventRecord;
use log::{debug, info};
use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Drainer sleep when the buffer has nothing ready
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Batches in flight between drainer and collector
const CHANNEL_CAPACITY: usize = 64;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let is_usage = err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || matches!(cause.downcast_ref::<RegistryError>(), Some(RegistryError::Buffer(_)))
    });
    if is_usage {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// What the collector thread saw
struct Collected {
    records: u64,
    exporter: Option<ChromeTraceExporter>,
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.runtime_config();
    config.validate().context("Invalid configuration")?;

    let registry = install_global(BufferRegistry::from_config(&config)?)?;
    let buffer = registry.require(&BufferId::default_buffer())?;
    let runtime = Runtime::new(config, Arc::clone(&registry));
    info!("{} ready: {:?}", BufferId::default_buffer(), buffer);

    let shape = WorkloadShape { chains: args.events, depth: args.depth };
    let stop = AtomicBool::new(false);
    let (tx, rx) = bounded::<Vec<EventRecord>>(CHANNEL_CAPACITY);
    let export_requested = args.export.is_some();
    let started = Instant::now();

    let (reports, drain_stats, collected) = std::thread::scope(|s| {
        let drainer = s.spawn(|| {
            let mut drainer = Drainer::new(Arc::clone(&buffer), args.batch_size);
            let stats = drainer.run(&tx, DRAIN_POLL_INTERVAL, &stop);
            drop(tx);
            stats
        });

        let collector = s.spawn(move || {
            let mut collected = Collected {
                records: 0,
                exporter: export_requested.then(ChromeTraceExporter::new),
            };
            for batch in &rx {
                collected.records += batch.len() as u64;
                if let Some(exporter) = collected.exporter.as_mut() {
                    exporter.add_records(&batch);
                }
            }
            collected
        });

        let writers: Vec<_> = (0..args.writers)
            .map(|writer| {
                let runtime = &runtime;
                s.spawn(move || run_writer(runtime, writer, shape))
            })
            .collect();

        let mut reports = 0;
        for handle in writers {
            match handle.join() {
                Ok(report) => reports += report.reports,
                Err(_) => debug!("writer thread panicked"),
            }
        }
        stop.store(true, Ordering::Release);

        let drain_stats = drainer.join().unwrap_or_default();
        let collected = collector.join().unwrap_or(Collected { records: 0, exporter: None });
        (reports, drain_stats, collected)
    });

    let elapsed = DurationNs::from(started.elapsed());
    if !args.quiet {
        print_summary(&runtime, reports, &drain_stats, collected.records, elapsed);
    }

    if let (Some(path), Some(exporter)) = (&args.export, &collected.exporter) {
        let file = File::create(path)
            .with_context(|| format!("Failed to create trace file: {}", path.display()))?;
        exporter.export(BufWriter::new(file))?;
        if !args.quiet {
            println!(
                "\nTrace written to {} ({} events, {} unclosed spans)",
                path.display(),
                exporter.event_count(),
                exporter.open_span_count()
            );
        }
    }

    Ok(())
}

fn print_summary(
    runtime: &Runtime,
    reports: u64,
    drain_stats: &DrainStats,
    collected: u64,
    elapsed: DurationNs,
) {
    println!("\n━━━ eventcap run ━━━");
    println!("  Elapsed:          {elapsed}");
    println!("  Report calls:     {reports}");
    if elapsed.as_seconds() > 0.0 {
        println!("  Throughput:       {:.0} reports/s", reports as f64 / elapsed.as_seconds());
    }

    println!("\n  Ingestion:        {}", runtime.ingest_stats());
    for (id, stats) in runtime.buffer_stats() {
        println!("  {:<18}{stats}", id.to_string());
    }
    println!("  Drainer:          {drain_stats}");
    println!("  Collected:        {collected}");
}
