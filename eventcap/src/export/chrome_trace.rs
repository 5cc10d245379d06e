use eventcap_common::{Captured, CorrelationId, EventKind, EventRecord, Payload};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use std::io::Write;

use crate::domain::ExportError;

/// Chrome Trace Event format
/// Format reference: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize)]
struct ChromeTraceEvent {
    /// Event name (function name for call spans)
    name: String,
    /// Category for filtering/coloring (the event kind)
    cat: String,
    /// Phase: "b" = async begin, "e" = async end, "n" = async instant
    ph: &'static str,
    /// Timestamp in microseconds, relative to the earliest record in the trace
    ts: f64,
    #[serde(skip)]
    timestamp_ns: u64,
    pid: u32,
    tid: u32,
    /// Async id: the correlation id, which pairs begin and end
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Map<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: &'a [ChromeTraceEvent],
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
}

/// Converts drained records into a Chrome trace for timeline visualization
///
/// Call spans are emitted as async events keyed by correlation id, so entry
/// and exit pair up even though records from many execution units arrive
/// interleaved. Everything else becomes an async instant inside its chain.
///
/// Records may be added in any order (several buffers drained one after the
/// other, say). Events are sorted by timestamp when the trace is exported.
pub struct ChromeTraceExporter {
    events: Vec<ChromeTraceEvent>,
    /// Names of spans opened but not yet closed, by correlation id
    open_spans: HashMap<CorrelationId, String>,
    /// Exits seen before their entry, by correlation id (indexes into `events`)
    early_exits: HashMap<CorrelationId, Vec<usize>>,
    pid: u32,
}

impl Default for ChromeTraceExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChromeTraceExporter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            open_spans: HashMap::new(),
            early_exits: HashMap::new(),
            pid: std::process::id(),
        }
    }

    /// Add a drained record to the trace
    pub fn add_record(&mut self, record: &EventRecord) {
        let mut args = Map::new();
        if let Some(ast_node_id) = &record.ast_node_id {
            args.insert("ast_node_id".to_string(), json!(ast_node_id.as_str()));
        }
        if record.truncated {
            args.insert("truncated".to_string(), json!(true));
        }

        let (name, ph) = match &record.payload {
            Payload::FunctionEntry { module, function, args: call_args } => {
                let name = format!("{module}::{function}");
                self.name_span(record.correlation_id, &name);
                args.insert("args".to_string(), captured_json(call_args));
                (name, "b")
            }
            Payload::FunctionExit { return_summary, duration_ns } => {
                // Named for now; renamed if its entry shows up later
                let name = self.open_spans.remove(&record.correlation_id).unwrap_or_else(|| {
                    self.early_exits.entry(record.correlation_id).or_default().push(self.events.len());
                    EventKind::FunctionExit.as_str().to_string()
                });
                args.insert("return".to_string(), captured_json(return_summary));
                args.insert("duration_ns".to_string(), json!(duration_ns));
                (name, "e")
            }
            Payload::Exception { exception_type, message } => {
                args.insert("message".to_string(), captured_json(message));
                (exception_type.clone(), "n")
            }
            Payload::VariableSnapshot { variables, line } => {
                args.insert("variables".to_string(), captured_json(variables));
                if let Some(line) = line {
                    args.insert("line".to_string(), json!(line));
                }
                (EventKind::VariableSnapshot.as_str().to_string(), "n")
            }
            Payload::HttpRequest { method, path, status, duration_ns } => {
                if let Some(status) = status {
                    args.insert("status".to_string(), json!(status));
                }
                if let Some(duration_ns) = duration_ns {
                    args.insert("duration_ns".to_string(), json!(duration_ns));
                }
                (format!("{method} {path}"), "n")
            }
            Payload::DatabaseQuery { system, statement, duration_ns } => {
                args.insert("statement".to_string(), captured_json(statement));
                if let Some(duration_ns) = duration_ns {
                    args.insert("duration_ns".to_string(), json!(duration_ns));
                }
                (system.clone(), "n")
            }
            Payload::Custom { name, data } => {
                args.insert("data".to_string(), captured_json(data));
                (name.clone(), "n")
            }
        };

        self.events.push(ChromeTraceEvent {
            name,
            cat: record.kind().as_str().to_string(),
            ph,
            ts: 0.0,
            timestamp_ns: record.timestamp_ns,
            pid: self.pid,
            tid: 0,
            id: format!("0x{:x}", record.correlation_id.0),
            args: if args.is_empty() { None } else { Some(args) },
        });
    }

    /// Give `name` to an exit already seen for `id`, or open a span under it
    fn name_span(&mut self, id: CorrelationId, name: &str) {
        let early = self.early_exits.get_mut(&id).and_then(Vec::pop);
        if self.early_exits.get(&id).is_some_and(Vec::is_empty) {
            self.early_exits.remove(&id);
        }
        match early {
            Some(index) => self.events[index].name = name.to_string(),
            None => {
                self.open_spans.insert(id, name.to_string());
            }
        }
    }

    /// Events in timestamp order, `ts` relative to the earliest one
    #[allow(clippy::cast_precision_loss)]
    fn timeline(&self) -> Vec<ChromeTraceEvent> {
        let start_ns = self.events.iter().map(|e| e.timestamp_ns).min().unwrap_or(0);
        let mut events = self.events.clone();
        // Stable: records with equal timestamps keep their arrival order
        events.sort_by_key(|e| e.timestamp_ns);
        for event in &mut events {
            event.ts = (event.timestamp_ns - start_ns) as f64 / 1000.0;
        }
        events
    }

    /// Add every record of a drained batch
    pub fn add_records<'a>(&mut self, records: impl IntoIterator<Item = &'a EventRecord>) {
        for record in records {
            self.add_record(record);
        }
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    ///
    /// # Errors
    ///
    /// Fails if serialization or the underlying writer fails.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        let events = self.timeline();
        let trace = ChromeTrace { trace_events: &events, display_time_unit: "ms" };
        serde_json::to_writer_pretty(&mut writer, &trace)?;
        writer.flush()?;
        Ok(())
    }

    /// Number of trace events collected
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Spans whose exit was never seen
    #[must_use]
    pub fn open_span_count(&self) -> usize {
        self.open_spans.len()
    }
}

fn captured_json(captured: &Captured) -> JsonValue {
    match captured {
        Captured::Full(value) => value.clone(),
        Captured::Summary { element_count, byte_size } => {
            json!({ "summary": { "element_count": element_count, "byte_size": byte_size } })
        }
    }
}
