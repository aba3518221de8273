//! NDJSON framing layer
//!
//! Newline-delimited JSON as used on the agent bridge socket: one complete
//! JSON value per line. The parser is stateful so it can reassemble values
//! across arbitrary chunk boundaries; the serializer is a free function.

use serde_json::Value;

/// Serialize a JSON value as a single NDJSON line (trailing `\n` included)
pub fn serialize_line(value: &Value) -> crate::Result<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

/// Incremental NDJSON parser
///
/// `feed` appends a chunk, emits every complete line through the callback,
/// and retains any trailing partial line. Malformed lines are logged and
/// dropped; whitespace-only lines are skipped.
#[derive(Debug, Default)]
pub struct NdjsonParser {
    buffer: String,
}

impl NdjsonParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text, invoking `callback` for each complete value
    pub fn feed<F: FnMut(Value)>(&mut self, chunk: &str, mut callback: F) {
        self.buffer.push_str(chunk);

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            parse_line(line.trim_end_matches('\n'), &mut callback);
        }
    }

    /// Parse whatever remains in the buffer as a final line
    ///
    /// A whitespace-only remainder is a no-op.
    pub fn flush<F: FnMut(Value)>(&mut self, mut callback: F) {
        let remainder = std::mem::take(&mut self.buffer);
        parse_line(&remainder, &mut callback);
    }

    /// Number of buffered bytes awaiting a newline
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line<F: FnMut(Value)>(line: &str, callback: &mut F) {
    if line.trim().is_empty() {
        return;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(value) => callback(value),
        Err(e) => {
            let preview = &line[..line.len().min(200)];
            tracing::warn!("dropping malformed NDJSON line: {} (line: {})", e, preview);
        }
    }
}
