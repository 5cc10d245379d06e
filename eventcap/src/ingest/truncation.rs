//! Payload size limiting
//!
//! A payload is measured whole, by its compact JSON encoding. When it is over
//! the limit, text fields (names, paths) longer than a share of the limit are
//! clipped, and if that is not enough the captured value is replaced by a
//! [`Captured::Summary`] carrying its top-level element count and measured
//! size. Neither a huge argument nor a huge name can blow up per-event memory.

use eventcap_common::{Captured, Payload};
use serde::Serialize;
use serde_json::Value;
use std::io;

/// A single text field may keep at most `limit / TEXT_FIELD_SHARE` bytes
pub const TEXT_FIELD_SHARE: usize = 4;

/// `io::Write` sink that only counts bytes.
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Size of `value` in bytes when encoded as compact JSON
#[must_use]
pub fn encoded_size<T: Serialize + ?Sized>(value: &T) -> usize {
    let mut counter = ByteCounter(0);
    // Payloads and values have string keys only; the sink never fails.
    let _ = serde_json::to_writer(&mut counter, value);
    counter.0
}

/// Top-level element count: items, entries, characters, or 1 for scalars
#[must_use]
pub fn element_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(entries) => entries.len(),
        Value::String(s) => s.chars().count(),
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) => 1,
    }
}

/// Summarize `captured` in place if it exceeds `limit` bytes
///
/// Returns true when the value was replaced. Values within the limit, and
/// values that are already summaries, are left untouched.
pub fn truncate_captured(captured: &mut Captured, limit: usize) -> bool {
    let Captured::Full(value) = captured else {
        return false;
    };
    let byte_size = encoded_size(value);
    if byte_size <= limit {
        return false;
    }
    *captured = Captured::Summary { element_count: element_count(value), byte_size };
    true
}

/// Shorten `text` to at most `max_bytes`, on a char boundary
///
/// Returns true when anything was cut.
pub fn clip_text(text: &mut String, max_bytes: usize) -> bool {
    if text.len() <= max_bytes {
        return false;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    true
}

/// Bring the whole payload under `limit` bytes where possible
///
/// Payloads within the limit are untouched. Otherwise long text fields are
/// clipped first, then the captured value is summarized if the payload is
/// still over. Field names and enum tags are never cut, so a very small
/// limit can leave the payload slightly above it.
pub fn truncate_payload(payload: &mut Payload, limit: usize) -> bool {
    if encoded_size(payload) <= limit {
        return false;
    }

    let text_budget = limit / TEXT_FIELD_SHARE;
    let mut changed = false;
    for text in payload.text_fields_mut() {
        changed |= clip_text(text, text_budget);
    }
    if changed && encoded_size(payload) <= limit {
        return true;
    }

    if let Some(captured) = payload.captured_mut() {
        changed |= truncate_captured(captured, 0);
    }
    changed
}
