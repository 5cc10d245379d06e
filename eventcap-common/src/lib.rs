//! # Shared Event Model (Instrumented Code ↔ Consumer)
//!
//! Defines the data structures that travel from instrumented call sites,
//! through the capture ring buffer, to whatever consumer drains it. Both
//! sides depend on this crate so the record layout stays in one place.
//!
//! ## Key Types
//!
//! - [`EventRecord`] - Immutable unit of captured data, one per report call
//! - [`Payload`] - Closed set of per-kind field sets
//! - [`EventKind`] - Discriminant of a payload (derived, never stored separately)
//! - [`CorrelationId`] - Opaque token pairing entry/exit events of one call chain
//! - [`AstNodeId`] - Opaque external identifier, carried but never interpreted
//! - [`Captured`] - A captured value, or the bounded summary that replaced it

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Correlation Identity
// ============================================================================

/// Opaque token identifying one logical call chain
///
/// Pairs entry and exit events and groups nested reports. Issued by
/// [`CorrelationId::next`] from a process-wide counter, so an id is never
/// reused for two unrelated chains during the lifetime of the process.
///
/// **Value**:
/// - `0`: [`CorrelationId::NONE`], placeholder returned by disabled report calls
/// - `1..`: Issued ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

/// Next id handed out by [`CorrelationId::next`]. Starts at 1 to keep 0 free for `NONE`.
static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

impl CorrelationId {
    /// Placeholder id, never issued by the generator
    pub const NONE: Self = Self(0);

    /// Issue a fresh, process-unique correlation id
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns true for the [`CorrelationId::NONE`] placeholder
    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid:{:x}", self.0)
    }
}

/// Opaque identifier of a static code-structure node
///
/// Maintained by a separate analysis system. Stored verbatim in the record;
/// nothing in the capture path validates or parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AstNodeId(String);

impl AstNodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AstNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AstNodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AstNodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Event Kinds
// ============================================================================

/// Discriminant of a [`Payload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FunctionEntry,
    FunctionExit,
    Exception,
    VariableSnapshot,
    HttpRequest,
    DatabaseQuery,
    Custom,
}

impl EventKind {
    /// Stable lowercase name, used as a category in exports
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::FunctionEntry => "function_entry",
            EventKind::FunctionExit => "function_exit",
            EventKind::Exception => "exception",
            EventKind::VariableSnapshot => "variable_snapshot",
            EventKind::HttpRequest => "http_request",
            EventKind::DatabaseQuery => "database_query",
            EventKind::Custom => "custom",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Captured Values
// ============================================================================

/// A value captured from user code
///
/// Oversized values are compacted by the ingestion path into a
/// [`Captured::Summary`], which keeps per-event memory bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Captured {
    /// Value stored verbatim
    Full(Value),

    /// Bounded stand-in for a value that exceeded the truncation limit
    Summary {
        /// Top-level element count (array items, object entries, string chars, 0 for null, 1 otherwise)
        element_count: usize,
        /// Compact JSON size of the original value in bytes
        byte_size: usize,
    },
}

impl Captured {
    /// Nothing captured
    #[must_use]
    pub fn empty() -> Self {
        Captured::Full(Value::Null)
    }

    #[must_use]
    pub fn is_summary(&self) -> bool {
        matches!(self, Captured::Summary { .. })
    }

    /// The stored value, if it was not summarized
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Captured::Full(value) => Some(value),
            Captured::Summary { .. } => None,
        }
    }
}

impl From<Value> for Captured {
    fn from(value: Value) -> Self {
        Captured::Full(value)
    }
}

impl Default for Captured {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Per-kind field set of an [`EventRecord`]
///
/// The set is closed: shapes outside these variants cannot be constructed,
/// and the record's kind is always derived from the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    FunctionEntry {
        module: String,
        function: String,
        args: Captured,
    },
    FunctionExit {
        return_summary: Captured,
        duration_ns: u64,
    },
    Exception {
        exception_type: String,
        message: Captured,
    },
    VariableSnapshot {
        variables: Captured,
        line: Option<u32>,
    },
    HttpRequest {
        method: String,
        path: String,
        status: Option<u16>,
        duration_ns: Option<u64>,
    },
    DatabaseQuery {
        /// Database system name, e.g. "postgresql"
        system: String,
        statement: Captured,
        duration_ns: Option<u64>,
    },
    Custom {
        name: String,
        data: Captured,
    },
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::FunctionEntry { .. } => EventKind::FunctionEntry,
            Payload::FunctionExit { .. } => EventKind::FunctionExit,
            Payload::Exception { .. } => EventKind::Exception,
            Payload::VariableSnapshot { .. } => EventKind::VariableSnapshot,
            Payload::HttpRequest { .. } => EventKind::HttpRequest,
            Payload::DatabaseQuery { .. } => EventKind::DatabaseQuery,
            Payload::Custom { .. } => EventKind::Custom,
        }
    }

    /// The user-supplied value of this payload, if its kind carries one
    ///
    /// This is the field subject to truncation.
    pub fn captured_mut(&mut self) -> Option<&mut Captured> {
        match self {
            Payload::FunctionEntry { args, .. } => Some(args),
            Payload::FunctionExit { return_summary, .. } => Some(return_summary),
            Payload::Exception { message, .. } => Some(message),
            Payload::VariableSnapshot { variables, .. } => Some(variables),
            Payload::DatabaseQuery { statement, .. } => Some(statement),
            Payload::Custom { data, .. } => Some(data),
            Payload::HttpRequest { .. } => None,
        }
    }

    /// Free-text identifying fields (names, paths), which are clipped rather
    /// than summarized when a record is oversized
    pub fn text_fields_mut(&mut self) -> Vec<&mut String> {
        match self {
            Payload::FunctionEntry { module, function, .. } => vec![module, function],
            Payload::Exception { exception_type, .. } => vec![exception_type],
            Payload::HttpRequest { method, path, .. } => vec![method, path],
            Payload::DatabaseQuery { system, .. } => vec![system],
            Payload::Custom { name, .. } => vec![name],
            Payload::FunctionExit { .. } | Payload::VariableSnapshot { .. } => Vec::new(),
        }
    }

    /// Read-only counterpart of [`Payload::captured_mut`]
    #[must_use]
    pub fn captured(&self) -> Option<&Captured> {
        match self {
            Payload::FunctionEntry { args, .. } => Some(args),
            Payload::FunctionExit { return_summary, .. } => Some(return_summary),
            Payload::Exception { message, .. } => Some(message),
            Payload::VariableSnapshot { variables, .. } => Some(variables),
            Payload::DatabaseQuery { statement, .. } => Some(statement),
            Payload::Custom { data, .. } => Some(data),
            Payload::HttpRequest { .. } => None,
        }
    }
}

// ============================================================================
// Event Record
// ============================================================================

/// Canonical unit of captured data
///
/// Written once by the ingestion path, then only read (cloned out of the ring
/// buffer by the drainer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic timestamp in nanoseconds (process-relative)
    pub timestamp_ns: u64,

    /// Chain this event belongs to
    pub correlation_id: CorrelationId,

    /// Optional link to a static code-structure node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast_node_id: Option<AstNodeId>,

    /// Kind-specific fields
    pub payload: Payload,

    /// Set when the captured value was replaced by a [`Captured::Summary`]
    #[serde(default)]
    pub truncated: bool,
}

impl EventRecord {
    #[must_use]
    pub fn new(timestamp_ns: u64, correlation_id: CorrelationId, payload: Payload) -> Self {
        Self { timestamp_ns, correlation_id, ast_node_id: None, payload, truncated: false }
    }

    #[must_use]
    pub fn with_ast_node_id(mut self, ast_node_id: Option<AstNodeId>) -> Self {
        self.ast_node_id = ast_node_id;
        self
    }

    /// Kind of this record, always in agreement with the payload
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
