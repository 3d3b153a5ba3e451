//! Line framing for streamed HTTP bodies
//!
//! Ollama sends newline-delimited JSON; OpenAI-compatible servers send
//! Server-Sent-Events `data:` lines. Both arrive as arbitrary byte chunks, so
//! lines are reassembled here before anything is parsed.

use serde::de::DeserializeOwned;

/// Reassembles complete lines from arbitrarily split byte chunks
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completed (trimmed, non-empty)
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let rest = self.buffer.split_off(newline_pos + 1);
            let line = std::mem::replace(&mut self.buffer, rest);
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Take whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Parse one NDJSON line; malformed lines are dropped
pub fn parse_ndjson_line<T: DeserializeOwned>(line: &str) -> Option<T> {
    match serde_json::from_str::<T>(line) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, line = %truncate(line, 200), "Skipping malformed stream line");
            None
        }
    }
}

/// One meaningful SSE line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` line
    Data(String),
    /// The literal `[DONE]` terminator
    Done,
}

/// Interpret a single SSE line; comments and non-data fields yield `None`
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();

    if payload == "[DONE]" {
        Some(SseEvent::Done)
    } else if payload.is_empty() {
        None
    } else {
        Some(SseEvent::Data(payload.to_string()))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
