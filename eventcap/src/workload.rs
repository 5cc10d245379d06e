//! Synthetic call chains for driving the runtime
//!
//! Each writer stands in for one execution unit of an instrumented program:
//! it owns a [`Context`] and reports nested calls the way generated
//! instrumentation would. The mix is deterministic so runs are comparable:
//!
//! - every call: entry, variable snapshot, (children), exit
//! - every 50th chain: an HTTP request and a database query in the root call
//! - every 97th chain: an exception in the innermost call
//! - every 250th chain: an oversized custom payload (exercises truncation)
//! - every 500th chain: the innermost call never reports its exit

use eventcap_common::CorrelationId;
use serde_json::json;
use std::time::Instant;

use crate::context::Context;
use crate::runtime::Runtime;

/// Elements in the oversized custom payload
const OVERSIZED_ELEMENTS: usize = 2_048;

/// Shape of one writer's workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadShape {
    /// Top-level chains to report
    pub chains: usize,
    /// Nested calls per chain (at least 1)
    pub depth: usize,
}

/// What one writer did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterReport {
    pub chains: usize,
    /// Report calls issued, accepted or not
    pub reports: u64,
}

/// Run one writer to completion on the calling thread
pub fn run_writer(runtime: &Runtime, writer: usize, shape: WorkloadShape) -> WriterReport {
    let mut slot = None;
    let context = runtime.ensure_context(&mut slot);
    let mut report = WriterReport::default();

    for chain in 0..shape.chains {
        report.reports += call(runtime, context, writer, chain, 0, shape.depth.max(1));
        report.chains += 1;
    }
    report
}

/// Report one call and its children; returns the number of report calls made
fn call(
    runtime: &Runtime,
    context: &mut Context,
    writer: usize,
    chain: usize,
    level: usize,
    depth: usize,
) -> u64 {
    let started = Instant::now();
    let innermost = level + 1 == depth;
    let mut reports = 0;

    let id = runtime.report_entry(
        context,
        "workload",
        &format!("level_{level}"),
        json!({ "writer": writer, "chain": chain, "level": level }),
    );
    reports += 1;

    let line = u32::try_from(level).unwrap_or(u32::MAX).saturating_add(10);
    runtime.report_variable_snapshot(
        context,
        CorrelationId::NONE,
        json!({ "chain": chain, "level": level }),
        Some(line),
        None,
    );
    reports += 1;

    if level == 0 && chain % 50 == 0 {
        runtime.report_http_request(context, "GET", &format!("/orders/{chain}"), Some(200), None);
        runtime.report_db_query(context, "postgresql", json!("SELECT * FROM orders WHERE id = $1"), None);
        reports += 2;
    }
    if level == 0 && chain % 250 == 0 {
        let blob: Vec<usize> = (0..OVERSIZED_ELEMENTS).collect();
        runtime.report_custom(context, CorrelationId::NONE, "oversized", json!(blob));
        reports += 1;
    }

    if innermost {
        if chain % 97 == 0 {
            runtime.report_exception(
                context,
                id,
                "SimulatedError",
                json!(format!("chain {chain} failed in writer {writer}")),
            );
            reports += 1;
        }
        // Stranded frame: the parent's exit unwinds it
        if chain % 500 == 499 {
            return reports;
        }
    } else {
        reports += call(runtime, context, writer, chain, level + 1, depth);
    }

    let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
    runtime.report_exit(context, id, json!(level), elapsed);
    reports + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn runtime(enabled: bool) -> Runtime {
        let config =
            RuntimeConfig { buffer_capacity: 4096, default_enabled: enabled, ..RuntimeConfig::default() };
        Runtime::from_config(config).unwrap()
    }

    #[test]
    fn test_every_report_reaches_the_buffer() {
        let runtime = runtime(true);
        let report = run_writer(&runtime, 0, WorkloadShape { chains: 10, depth: 3 });

        // chain 0 adds http + db + oversized + exception
        assert_eq!(report.reports, 10 * 3 * 3 + 4);
        let stats = runtime.registry().default_buffer().unwrap().stats();
        assert_eq!(stats.total_writes, report.reports);
        assert_eq!(runtime.ingest_stats().truncated, 1);
    }

    #[test]
    fn test_disabled_writer_writes_nothing() {
        let runtime = runtime(false);
        let report = run_writer(&runtime, 0, WorkloadShape { chains: 20, depth: 2 });

        assert!(report.reports > 0);
        let stats = runtime.registry().default_buffer().unwrap().stats();
        assert_eq!(stats.total_writes, 0);
    }

    #[test]
    fn test_stranded_frame_is_unwound() {
        let runtime = runtime(true);
        let report = run_writer(&runtime, 1, WorkloadShape { chains: 500, depth: 2 });
        assert_eq!(report.chains, 500);

        let records = runtime
            .registry()
            .default_buffer()
            .unwrap()
            .read_batch(0, 4096)
            .records;
        let entries = records.iter().filter(|r| r.kind() == eventcap_common::EventKind::FunctionEntry);
        let exits = records.iter().filter(|r| r.kind() == eventcap_common::EventKind::FunctionExit);
        assert_eq!(entries.count(), exits.count() + 1);
    }
}
