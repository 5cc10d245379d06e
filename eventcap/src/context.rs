//! # Per-Execution-Unit Context
//!
//! A [`Context`] is the state one execution unit (thread, task, request
//! handler) carries through its instrumented calls: whether capture is on,
//! which buffer its events go to, and the stack of open call chains.
//!
//! The context is owned by its execution unit and passed as `&mut Context`
//! into every report call, so none of this state is shared or synchronized.
//! Dropping the context is the whole cleanup.
//!
//! ## Call Stack Tolerance
//!
//! Entry reports push a correlation id, exit reports pop it. Panics, early
//! returns and other non-local exits can skip the exit report, so the stack
//! is allowed to drift:
//!
//! - popping an empty stack is a no-op returning `None`
//! - an exit for a frame below the top unwinds the frames above it
//!   ([`Context::unwind_to`]) instead of leaving them stranded

use eventcap_common::CorrelationId;
use log::warn;
use std::sync::Arc;

use crate::buffer::{BufferRegistry, RingBuffer};
use crate::config::RuntimeConfig;
use crate::domain::BufferId;

/// Capture state of one execution unit
#[derive(Debug, Default)]
pub struct Context {
    enabled: bool,
    /// Destination buffer, resolved once from the registry. The registry owns it.
    buffer: Option<Arc<RingBuffer>>,
    root_correlation_id: Option<CorrelationId>,
    call_stack: Vec<CorrelationId>,
}

impl Context {
    /// Default state for a new execution unit
    ///
    /// `enabled` comes from `config.default_enabled`, the stack starts empty
    /// and the buffer is looked up by `buffer_id`. An unknown buffer leaves the
    /// context disabled, so every report from it is a no-op.
    #[must_use]
    pub fn initialize(config: &RuntimeConfig, registry: &BufferRegistry, buffer_id: &BufferId) -> Self {
        let buffer = registry.get(buffer_id);
        if buffer.is_none() {
            warn!("{buffer_id} is not registered; instrumentation disabled for this context");
        }
        Self {
            enabled: config.default_enabled && buffer.is_some(),
            buffer,
            root_correlation_id: None,
            call_stack: Vec::new(),
        }
    }

    /// Context writing to `buffer` directly, without a registry
    #[must_use]
    pub fn with_buffer(buffer: Arc<RingBuffer>, enabled: bool) -> Self {
        Self { enabled, buffer: Some(buffer), root_correlation_id: None, call_stack: Vec::new() }
    }

    /// Context with no destination; every report through it is a no-op
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn buffer(&self) -> Option<&Arc<RingBuffer>> {
        self.buffer.as_ref()
    }

    // =========================================================================
    // Correlation
    // =========================================================================

    /// Innermost open chain: top of the stack, else the root id, else `None`
    #[must_use]
    pub fn current_correlation_id(&self) -> Option<CorrelationId> {
        self.call_stack.last().copied().or(self.root_correlation_id)
    }

    #[must_use]
    pub fn root_correlation_id(&self) -> Option<CorrelationId> {
        self.root_correlation_id
    }

    /// Anchor id used when no call is open, e.g. an inbound request id
    pub fn set_root_correlation_id(&mut self, id: Option<CorrelationId>) {
        self.root_correlation_id = id;
    }

    pub fn push_call(&mut self, id: CorrelationId) {
        self.call_stack.push(id);
    }

    /// Pop the innermost open call; `None` on an empty stack
    pub fn pop_call(&mut self) -> Option<CorrelationId> {
        self.call_stack.pop()
    }

    /// Number of open calls
    #[must_use]
    pub fn depth(&self) -> usize {
        self.call_stack.len()
    }

    /// True if `id` is an open call or the root id
    #[must_use]
    pub fn is_known(&self, id: CorrelationId) -> bool {
        self.root_correlation_id == Some(id) || self.call_stack.contains(&id)
    }

    /// Close `id` and every call opened after it
    ///
    /// Returns how many frames were removed, or `None` if `id` is not on the
    /// stack (the stack is then left untouched).
    pub fn unwind_to(&mut self, id: CorrelationId) -> Option<usize> {
        let index = self.call_stack.iter().rposition(|open| *open == id)?;
        let removed = self.call_stack.len() - index;
        self.call_stack.truncate(index);
        Some(removed)
    }

    /// Forget all open calls and the root id
    pub fn reset(&mut self) {
        self.call_stack.clear();
        self.root_correlation_id = None;
    }

    // =========================================================================
    // Scoped suppression
    // =========================================================================

    /// Run `body` with capture disabled
    ///
    /// The previous `enabled` value is restored when `body` returns, returns
    /// an error, or panics. Calls made by the instrumentation's own helpers
    /// go through here so they do not report themselves.
    pub fn with_instrumentation_disabled<R>(&mut self, body: impl FnOnce(&mut Context) -> R) -> R {
        let prior = self.enabled;
        self.enabled = false;
        let mut guard = RestoreEnabled { context: self, prior };
        body(&mut *guard.context)
    }
}

/// Puts `enabled` back on every exit path of a suppressed scope.
struct RestoreEnabled<'a> {
    context: &'a mut Context,
    prior: bool,
}

impl Drop for RestoreEnabled<'_> {
    fn drop(&mut self) {
        self.context.enabled = self.prior;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OverflowStrategy;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn enabled_context() -> Context {
        let buffer = Arc::new(RingBuffer::new(8, OverflowStrategy::DropOldest).unwrap());
        Context::with_buffer(buffer, true)
    }

    #[test]
    fn test_initialize_from_registry() {
        let registry =
            BufferRegistry::builder().buffer("default", 8, OverflowStrategy::DropOldest).unwrap().build();
        let config = RuntimeConfig::default();

        let context = Context::initialize(&config, &registry, &BufferId::default_buffer());
        assert!(context.is_enabled());
        assert!(context.buffer().is_some());
        assert_eq!(context.depth(), 0);
        assert_eq!(context.current_correlation_id(), None);
    }

    #[test]
    fn test_initialize_respects_default_enabled() {
        let registry =
            BufferRegistry::builder().buffer("default", 8, OverflowStrategy::DropOldest).unwrap().build();
        let config = RuntimeConfig { default_enabled: false, ..RuntimeConfig::default() };

        let context = Context::initialize(&config, &registry, &BufferId::default_buffer());
        assert!(!context.is_enabled());
        assert!(context.buffer().is_some());
    }

    #[test]
    fn test_initialize_unknown_buffer_disables() {
        let registry = BufferRegistry::default();
        let context = Context::initialize(&RuntimeConfig::default(), &registry, &"nope".into());
        assert!(!context.is_enabled());
        assert!(context.buffer().is_none());
    }

    #[test]
    fn test_push_pop_returns_to_empty() {
        let mut context = enabled_context();
        let ids: Vec<CorrelationId> = (1..=5).map(CorrelationId).collect();
        for id in &ids {
            context.push_call(*id);
        }
        assert_eq!(context.depth(), 5);

        for id in ids.iter().rev() {
            assert_eq!(context.pop_call(), Some(*id));
        }
        assert_eq!(context.depth(), 0);

        // Extra pop is a no-op
        assert_eq!(context.pop_call(), None);
        assert_eq!(context.depth(), 0);
        assert!(context.is_enabled());
    }

    #[test]
    fn test_current_correlation_id_falls_back_to_root() {
        let mut context = enabled_context();
        assert_eq!(context.current_correlation_id(), None);

        context.set_root_correlation_id(Some(CorrelationId(100)));
        assert_eq!(context.current_correlation_id(), Some(CorrelationId(100)));

        context.push_call(CorrelationId(1));
        assert_eq!(context.current_correlation_id(), Some(CorrelationId(1)));

        context.pop_call();
        assert_eq!(context.current_correlation_id(), Some(CorrelationId(100)));
    }

    #[test]
    fn test_unwind_to_removes_stranded_frames() {
        let mut context = enabled_context();
        for id in 1..=4 {
            context.push_call(CorrelationId(id));
        }

        assert_eq!(context.unwind_to(CorrelationId(2)), Some(3));
        assert_eq!(context.current_correlation_id(), Some(CorrelationId(1)));

        assert_eq!(context.unwind_to(CorrelationId(99)), None);
        assert_eq!(context.depth(), 1);
    }

    #[test]
    fn test_is_known_covers_stack_and_root() {
        let mut context = enabled_context();
        context.set_root_correlation_id(Some(CorrelationId(7)));
        context.push_call(CorrelationId(8));

        assert!(context.is_known(CorrelationId(7)));
        assert!(context.is_known(CorrelationId(8)));
        assert!(!context.is_known(CorrelationId(9)));

        context.reset();
        assert!(!context.is_known(CorrelationId(7)));
        assert_eq!(context.depth(), 0);
    }

    #[test]
    fn test_disabled_scope_restores_prior_value() {
        let mut context = enabled_context();
        let seen = context.with_instrumentation_disabled(|ctx| ctx.is_enabled());
        assert!(!seen);
        assert!(context.is_enabled());

        context.set_enabled(false);
        context.with_instrumentation_disabled(|ctx| ctx.set_enabled(true));
        assert!(!context.is_enabled(), "exact prior value restored, not forced on");
    }

    #[test]
    fn test_nested_disabled_scopes() {
        let mut context = enabled_context();
        context.with_instrumentation_disabled(|outer| {
            outer.with_instrumentation_disabled(|inner| assert!(!inner.is_enabled()));
            assert!(!outer.is_enabled());
        });
        assert!(context.is_enabled());
    }

    #[test]
    fn test_disabled_scope_restores_after_error() {
        let mut context = enabled_context();
        let result: Result<(), &str> = context.with_instrumentation_disabled(|_| Err("boom"));
        assert!(result.is_err());
        assert!(context.is_enabled());
    }

    #[test]
    fn test_disabled_scope_restores_after_panic() {
        let mut context = enabled_context();
        let result = catch_unwind(AssertUnwindSafe(|| {
            context.with_instrumentation_disabled(|_| panic!("body failed"));
        }));
        assert!(result.is_err());
        assert!(context.is_enabled());
    }
}
