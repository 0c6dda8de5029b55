//! Line forwarding from raw container output to the [`Logger`].

use crate::logger::{Logger, MAX_MESSAGE_BYTES};

/// Forwards one workload line. Never fails: delivery problems are absorbed
/// by the logger's delivery task.
pub async fn emit(logger: &Logger, line: impl Into<String>) {
    logger.workload(line).await;
}

/// Reassembles lines from output chunks that may break anywhere.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    /// Creates an empty splitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes `chunk` and returns every line it completes, in order.
    ///
    /// Lines are decoded lossily, stripped of trailing whitespace, and
    /// dropped when blank. An unterminated fragment that reaches
    /// [`MAX_MESSAGE_BYTES`] is returned as a line of its own so the pending
    /// buffer stays bounded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(pos);
            self.partial.extend_from_slice(head);
            let raw = std::mem::take(&mut self.partial);
            if let Some(line) = decode(&raw) {
                lines.push(line);
            }
            rest = tail.get(1..).unwrap_or_default();
        }
        self.partial.extend_from_slice(rest);
        while self.partial.len() >= MAX_MESSAGE_BYTES {
            let cut = char_boundary_before(&self.partial, MAX_MESSAGE_BYTES);
            let head: Vec<u8> = self.partial.drain(..cut).collect();
            if let Some(line) = decode(&head) {
                lines.push(line);
            }
        }
        lines
    }

    /// Returns the unterminated fragment left at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.partial);
        decode(&raw)
    }
}

/// Largest cut at or below `limit` that does not split a UTF-8 sequence.
/// Falls back to `limit` when no boundary exists, as in invalid input.
fn char_boundary_before(bytes: &[u8], limit: usize) -> usize {
    let is_continuation = |idx: usize| bytes.get(idx).is_some_and(|byte| byte & 0xC0 == 0x80);
    let mut cut = limit;
    while cut > 0 && is_continuation(cut) {
        cut -= 1;
    }
    if cut == 0 { limit } else { cut }
}

fn decode(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
