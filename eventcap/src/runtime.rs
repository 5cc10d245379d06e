//! # Runtime Facade
//!
//! The fixed call surface generated instrumentation code calls into. Every
//! entry point takes the caller's [`Context`] and behaves in one of two ways:
//!
//! - **Disabled** (`Context::is_enabled` is false, or no buffer): returns at
//!   once with a value of the expected shape (`CorrelationId::NONE` or `false`).
//! - **Enabled**: resolves the correlation id, maintains the call stack
//!   (push on entry, pop on exit) and hands the payload to the [`Ingestor`].
//!
//! ## Correlation Rules
//!
//! | Call                        | `CorrelationId::NONE` argument     | Unknown id |
//! |-----------------------------|------------------------------------|------------|
//! | `report_entry`              | (no id argument, always new chain) | n/a        |
//! | `report_ast_entry`          | new chain                          | adopted    |
//! | `report_exit`               | no-op                              | no-op      |
//! | snapshot / exception / custom | current chain, else new chain    | no-op      |
//! | http / db                   | (no id argument, current chain)    | n/a        |
//!
//! An id is "known" when it is open on the context's call stack or is the
//! context's root id. Unknown ids come from stacks that were unwound without
//! exit reports; they are dropped quietly.
//!
//! ## Return Values
//!
//! The `bool` returned by the non-entry calls is the call-site "ok": true
//! when the report was accepted for ingestion. Buffer overflow is never
//! reflected here; see [`Runtime::ingest_stats`].

use eventcap_common::{AstNodeId, CorrelationId, Payload};
use log::debug;
use serde_json::Value;
use std::sync::Arc;

use crate::buffer::{BufferRegistry, BufferStats, RingBuffer};
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::domain::{BufferId, RegistryError};
use crate::ingest::{EventDraft, IngestStats, Ingestor};

/// Shared entry point for instrumented code
///
/// One instance per process, shared by reference (or `Arc`) across all
/// execution units. It holds no per-unit state.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<BufferRegistry>,
    ingestor: Ingestor,
}

impl Runtime {
    #[must_use]
    pub fn new(config: RuntimeConfig, registry: Arc<BufferRegistry>) -> Self {
        let ingestor = Ingestor::from_config(&config);
        Self { config, registry, ingestor }
    }

    /// Runtime over a registry holding one default buffer shaped by `config`
    ///
    /// # Errors
    ///
    /// Fails when the configured capacity is not a power of two.
    pub fn from_config(config: RuntimeConfig) -> Result<Self, RegistryError> {
        let registry = Arc::new(BufferRegistry::from_config(&config)?);
        Ok(Self::new(config, registry))
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<BufferRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn ingest_stats(&self) -> IngestStats {
        self.ingestor.stats()
    }

    /// Statistics of every registered buffer
    #[must_use]
    pub fn buffer_stats(&self) -> Vec<(BufferId, BufferStats)> {
        self.registry.iter().map(|(id, buffer)| (id.clone(), buffer.stats())).collect()
    }

    // =========================================================================
    // Context creation
    // =========================================================================

    /// Fresh context writing to the default buffer
    #[must_use]
    pub fn context(&self) -> Context {
        self.context_for(&BufferId::default_buffer())
    }

    /// Fresh context writing to `buffer_id`
    #[must_use]
    pub fn context_for(&self, buffer_id: &BufferId) -> Context {
        Context::initialize(&self.config, &self.registry, buffer_id)
    }

    /// Lazily create the execution unit's context on first use
    pub fn ensure_context<'a>(&self, slot: &'a mut Option<Context>) -> &'a mut Context {
        slot.get_or_insert_with(|| self.context())
    }

    // =========================================================================
    // Core report functions
    // =========================================================================

    /// Report entry into `module::function`
    ///
    /// Opens a new call chain, pushes it on the context's stack and returns
    /// its id, which the matching [`Runtime::report_exit`] must pass back.
    pub fn report_entry(
        &self,
        context: &mut Context,
        module: &str,
        function: &str,
        args: Value,
    ) -> CorrelationId {
        let Some(buffer) = active_buffer(context) else {
            return CorrelationId::NONE;
        };
        let payload = Payload::FunctionEntry {
            module: module.to_string(),
            function: function.to_string(),
            args: args.into(),
        };
        let id = self.ingestor.ingest(buffer, EventDraft::new(payload));
        context.push_call(id);
        id
    }

    /// Report exit from the call opened under `correlation_id`
    ///
    /// Calls opened after it that never reported their exit are unwound too.
    pub fn report_exit(
        &self,
        context: &mut Context,
        correlation_id: CorrelationId,
        return_summary: Value,
        duration_ns: u64,
    ) -> bool {
        if !is_active(context) || correlation_id.is_none() {
            return false;
        }
        let unwound = context.unwind_to(correlation_id);
        if unwound.is_none() && context.root_correlation_id() != Some(correlation_id) {
            debug!("ignoring exit for unknown {correlation_id}");
            return false;
        }
        if let Some(stranded) = unwound.filter(|frames| *frames > 1) {
            debug!("exit for {correlation_id} unwound {} stranded frame(s)", stranded - 1);
        }

        let payload = Payload::FunctionExit { return_summary: return_summary.into(), duration_ns };
        self.submit(context, Some(correlation_id), None, payload)
    }

    // =========================================================================
    // AST-aware report functions
    // =========================================================================

    /// Report entry with an externally supplied correlation id and AST node
    ///
    /// `correlation_id` is adopted as the new call's id (`NONE` issues a
    /// fresh one, readable afterwards through `current_correlation_id`).
    /// `ast_node_id` is stored as-is.
    pub fn report_ast_entry(
        &self,
        context: &mut Context,
        module: &str,
        function: &str,
        args: Value,
        correlation_id: CorrelationId,
        ast_node_id: AstNodeId,
    ) -> bool {
        let Some(buffer) = active_buffer(context) else {
            return false;
        };
        let payload = Payload::FunctionEntry {
            module: module.to_string(),
            function: function.to_string(),
            args: args.into(),
        };
        let draft =
            EventDraft::new(payload).correlation_id(Some(correlation_id)).ast_node_id(Some(ast_node_id));
        let id = self.ingestor.ingest(buffer, draft);
        // Every entry opens a frame, even one nested under the same id
        context.push_call(id);
        true
    }

    /// Report the values of local variables at `line`
    pub fn report_variable_snapshot(
        &self,
        context: &mut Context,
        correlation_id: CorrelationId,
        variables: Value,
        line: Option<u32>,
        ast_node_id: Option<AstNodeId>,
    ) -> bool {
        let payload = Payload::VariableSnapshot { variables: variables.into(), line };
        self.report_in_chain(context, correlation_id, ast_node_id, payload)
    }

    /// Report an exception raised inside a call chain
    pub fn report_exception(
        &self,
        context: &mut Context,
        correlation_id: CorrelationId,
        exception_type: &str,
        message: Value,
    ) -> bool {
        let payload =
            Payload::Exception { exception_type: exception_type.to_string(), message: message.into() };
        self.report_in_chain(context, correlation_id, None, payload)
    }

    /// Report a free-form named event
    pub fn report_custom(
        &self,
        context: &mut Context,
        correlation_id: CorrelationId,
        name: &str,
        data: Value,
    ) -> bool {
        let payload = Payload::Custom { name: name.to_string(), data: data.into() };
        self.report_in_chain(context, correlation_id, None, payload)
    }

    // =========================================================================
    // Framework report functions
    // =========================================================================

    /// Report an HTTP request handled (or issued) in the current chain
    pub fn report_http_request(
        &self,
        context: &mut Context,
        method: &str,
        path: &str,
        status: Option<u16>,
        duration_ns: Option<u64>,
    ) -> bool {
        let payload = Payload::HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            status,
            duration_ns,
        };
        self.report_in_chain(context, CorrelationId::NONE, None, payload)
    }

    /// Report a database statement executed in the current chain
    pub fn report_db_query(
        &self,
        context: &mut Context,
        system: &str,
        statement: Value,
        duration_ns: Option<u64>,
    ) -> bool {
        let payload = Payload::DatabaseQuery {
            system: system.to_string(),
            statement: statement.into(),
            duration_ns,
        };
        self.report_in_chain(context, CorrelationId::NONE, None, payload)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Report attached to an existing chain; unknown ids are dropped.
    fn report_in_chain(
        &self,
        context: &Context,
        correlation_id: CorrelationId,
        ast_node_id: Option<AstNodeId>,
        payload: Payload,
    ) -> bool {
        if !is_active(context) {
            return false;
        }
        let chain = if correlation_id.is_none() {
            context.current_correlation_id()
        } else if context.is_known(correlation_id) {
            Some(correlation_id)
        } else {
            debug!("ignoring {} for unknown {correlation_id}", payload.kind());
            return false;
        };
        self.submit(context, chain, ast_node_id, payload)
    }

    fn submit(
        &self,
        context: &Context,
        correlation_id: Option<CorrelationId>,
        ast_node_id: Option<AstNodeId>,
        payload: Payload,
    ) -> bool {
        let Some(buffer) = active_buffer(context) else {
            return false;
        };
        let draft = EventDraft::new(payload).correlation_id(correlation_id).ast_node_id(ast_node_id);
        self.ingestor.ingest(buffer, draft);
        true
    }
}

#[inline]
fn is_active(context: &Context) -> bool {
    context.is_enabled() && context.buffer().is_some()
}

#[inline]
fn active_buffer(context: &Context) -> Option<&RingBuffer> {
    if context.is_enabled() {
        context.buffer().map(|buffer| &**buffer)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OverflowStrategy;
    use eventcap_common::{Captured, EventKind, EventRecord};
    use serde_json::json;

    fn runtime() -> Runtime {
        let config = RuntimeConfig { buffer_capacity: 64, ..RuntimeConfig::default() };
        Runtime::from_config(config).unwrap()
    }

    fn drain(runtime: &Runtime) -> Vec<eventcap_common::EventRecord> {
        runtime.registry().default_buffer().unwrap().read_batch(0, usize::MAX).records
    }

    #[test]
    fn test_entry_exit_pair() {
        let runtime = runtime();
        let mut ctx = runtime.context();

        let id = runtime.report_entry(&mut ctx, "app", "handler", json!([1, 2]));
        assert!(!id.is_none());
        assert_eq!(ctx.current_correlation_id(), Some(id));

        assert!(runtime.report_exit(&mut ctx, id, json!("ok"), 1_500));
        assert_eq!(ctx.depth(), 0);

        let records = drain(&runtime);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind(), EventKind::FunctionEntry);
        assert_eq!(records[1].kind(), EventKind::FunctionExit);
        assert!(records.iter().all(|r| r.correlation_id == id));
        assert_eq!(
            records[1].payload,
            Payload::FunctionExit { return_summary: Captured::Full(json!("ok")), duration_ns: 1_500 }
        );
    }

    #[test]
    fn test_disabled_context_writes_nothing() {
        let runtime = runtime();
        let mut ctx = runtime.context();
        ctx.set_enabled(false);

        assert_eq!(runtime.report_entry(&mut ctx, "m", "f", json!(null)), CorrelationId::NONE);
        assert!(!runtime.report_exit(&mut ctx, CorrelationId(1), json!(null), 0));
        assert!(!runtime.report_ast_entry(&mut ctx, "m", "f", json!(null), CorrelationId(5), "n".into()));
        assert!(!runtime.report_variable_snapshot(&mut ctx, CorrelationId::NONE, json!({}), None, None));
        assert!(!runtime.report_exception(&mut ctx, CorrelationId::NONE, "E", json!("x")));
        assert!(!runtime.report_custom(&mut ctx, CorrelationId::NONE, "c", json!(1)));
        assert!(!runtime.report_http_request(&mut ctx, "GET", "/", Some(200), None));
        assert!(!runtime.report_db_query(&mut ctx, "sqlite", json!("select 1"), None));

        assert_eq!(ctx.depth(), 0);
        assert_eq!(runtime.registry().default_buffer().unwrap().stats().total_writes, 0);
        assert_eq!(runtime.ingest_stats().ingested, 0);
    }

    #[test]
    fn test_exit_with_unknown_id_is_noop() {
        let runtime = runtime();
        let mut ctx = runtime.context();
        let id = runtime.report_entry(&mut ctx, "m", "f", json!(null));

        assert!(!runtime.report_exit(&mut ctx, CorrelationId(u64::MAX), json!(null), 0));
        assert!(!runtime.report_exit(&mut ctx, CorrelationId::NONE, json!(null), 0));
        assert_eq!(ctx.current_correlation_id(), Some(id));
        assert_eq!(drain(&runtime).len(), 1);
    }

    #[test]
    fn test_exit_unwinds_stranded_frames() {
        let runtime = runtime();
        let mut ctx = runtime.context();
        let outer = runtime.report_entry(&mut ctx, "m", "outer", json!(null));
        let inner = runtime.report_entry(&mut ctx, "m", "inner", json!(null));

        // inner never reports its exit
        assert!(runtime.report_exit(&mut ctx, outer, json!(null), 10));
        assert_eq!(ctx.depth(), 0);

        // a late exit for the unwound frame is now stale
        assert!(!runtime.report_exit(&mut ctx, inner, json!(null), 10));
    }

    #[test]
    fn test_ast_entry_adopts_supplied_id() {
        let runtime = runtime();
        let mut ctx = runtime.context();

        assert!(runtime.report_ast_entry(
            &mut ctx,
            "m",
            "f",
            json!([]),
            CorrelationId(9_000_001),
            AstNodeId::new("ast:42")
        ));
        assert_eq!(ctx.current_correlation_id(), Some(CorrelationId(9_000_001)));

        let records = drain(&runtime);
        assert_eq!(records[0].correlation_id, CorrelationId(9_000_001));
        assert_eq!(records[0].ast_node_id, Some(AstNodeId::new("ast:42")));
    }

    #[test]
    fn test_ast_entries_sharing_an_id_nest() {
        let runtime = runtime();
        let mut ctx = runtime.context();
        let shared = CorrelationId(9_000_002);

        assert!(runtime.report_ast_entry(&mut ctx, "m", "outer", json!([]), shared, "ast:1".into()));
        assert!(runtime.report_ast_entry(&mut ctx, "m", "inner", json!([]), shared, "ast:2".into()));
        assert_eq!(ctx.depth(), 2);

        assert!(runtime.report_exit(&mut ctx, shared, json!("inner"), 5));
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.current_correlation_id(), Some(shared));
        assert!(runtime.report_exit(&mut ctx, shared, json!("outer"), 9));
        assert_eq!(ctx.depth(), 0);

        let kinds: Vec<EventKind> = drain(&runtime).iter().map(EventRecord::kind).collect();
        assert_eq!(
            kinds,
            [EventKind::FunctionEntry, EventKind::FunctionEntry, EventKind::FunctionExit, EventKind::FunctionExit]
        );
    }

    #[test]
    fn test_ast_entry_without_id_issues_one() {
        let runtime = runtime();
        let mut ctx = runtime.context();

        assert!(runtime.report_ast_entry(&mut ctx, "m", "f", json!([]), CorrelationId::NONE, "n".into()));
        let id = ctx.current_correlation_id().unwrap();
        assert!(!id.is_none());
        assert!(runtime.report_exit(&mut ctx, id, json!(null), 0));
    }

    #[test]
    fn test_snapshot_attaches_to_current_chain() {
        let runtime = runtime();
        let mut ctx = runtime.context();
        let id = runtime.report_entry(&mut ctx, "m", "f", json!(null));

        assert!(runtime.report_variable_snapshot(
            &mut ctx,
            CorrelationId::NONE,
            json!({"x": 1}),
            Some(12),
            Some("ast:7".into())
        ));
        assert!(runtime.report_variable_snapshot(&mut ctx, id, json!({"x": 2}), Some(13), None));
        assert!(!runtime.report_variable_snapshot(&mut ctx, CorrelationId(u64::MAX), json!({}), None, None));

        let records = drain(&runtime);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].correlation_id, id);
        assert_eq!(records[1].ast_node_id, Some(AstNodeId::new("ast:7")));
        assert_eq!(records[2].correlation_id, id);
    }

    #[test]
    fn test_root_id_is_a_known_chain() {
        let runtime = runtime();
        let mut ctx = runtime.context();
        ctx.set_root_correlation_id(Some(CorrelationId(555)));

        assert!(runtime.report_custom(&mut ctx, CorrelationId(555), "request.start", json!({})));
        assert!(runtime.report_http_request(&mut ctx, "GET", "/orders", Some(200), Some(1_000)));

        let records = drain(&runtime);
        assert!(records.iter().all(|r| r.correlation_id == CorrelationId(555)));
    }

    #[test]
    fn test_framework_reports_without_chain_start_new_one() {
        let runtime = runtime();
        let mut ctx = runtime.context();

        assert!(runtime.report_db_query(&mut ctx, "postgresql", json!("select 1"), Some(250)));
        assert!(runtime.report_exception(&mut ctx, CorrelationId::NONE, "ValueError", json!("bad")));

        let records = drain(&runtime);
        assert_eq!(records.len(), 2);
        assert!(!records[0].correlation_id.is_none());
        assert_ne!(records[0].correlation_id, records[1].correlation_id);
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_ensure_context_is_lazy_and_stable() {
        let runtime = runtime();
        let mut slot = None;

        let id = {
            let ctx = runtime.ensure_context(&mut slot);
            runtime.report_entry(ctx, "m", "f", json!(null))
        };
        let ctx = runtime.ensure_context(&mut slot);
        assert_eq!(ctx.current_correlation_id(), Some(id));
    }

    #[test]
    fn test_reports_inside_disabled_scope_are_suppressed() {
        let runtime = runtime();
        let mut ctx = runtime.context();

        ctx.with_instrumentation_disabled(|inner| {
            runtime.report_entry(inner, "m", "helper", json!(null));
        });
        let id = runtime.report_entry(&mut ctx, "m", "f", json!(null));

        let records = drain(&runtime);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id, id);
    }

    #[test]
    fn test_context_for_named_buffer() {
        let registry = BufferRegistry::builder()
            .buffer("default", 8, OverflowStrategy::DropOldest)
            .unwrap()
            .buffer("web", 8, OverflowStrategy::DropNewest)
            .unwrap()
            .build();
        let runtime = Runtime::new(RuntimeConfig::default(), Arc::new(registry));
        let mut web = runtime.context_for(&"web".into());

        runtime.report_entry(&mut web, "m", "f", json!(null));

        let stats = runtime.buffer_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].0.as_str(), "default");
        assert_eq!(stats[0].1.total_writes, 0);
        assert_eq!(stats[1].0.as_str(), "web");
        assert_eq!(stats[1].1.total_writes, 1);
    }
}
