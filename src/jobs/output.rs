//! Captured process output.
//!
//! Each job keeps three capped buffers (stdout, stderr, and the interleaved
//! combined stream) plus a short tail used for previews. Buffers are trimmed
//! from the front once they exceed their cap, so the most recent output is
//! always retained. Trimming sets a truncation flag that is never cleared.

use serde::{Deserialize, Serialize};

/// Which process stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Incremental UTF-8 decoder for a byte stream read in arbitrary chunks.
///
/// A multi-byte character split across two reads is held back until the rest
/// of it arrives; genuinely invalid bytes are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode a chunk, carrying over any incomplete trailing character.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Largest char boundary in `s` that is `<= index`.
pub(crate) fn floor_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary in `s` that is `>= index`.
fn ceil_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Append-only text buffer capped at `max_bytes`, trimmed from the front.
#[derive(Debug, Clone)]
pub struct CappedBuffer {
    text: String,
    max_bytes: usize,
    truncated: bool,
    /// Bytes dropped from the front over the buffer's lifetime.
    dropped: usize,
}

impl CappedBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            max_bytes,
            truncated: false,
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.max_bytes {
            let cut = ceil_boundary(&self.text, self.text.len() - self.max_bytes);
            self.text.drain(..cut);
            self.dropped += cut;
            self.truncated = true;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// The last `n` bytes (rounded to a char boundary).
    pub fn last_bytes(&self, n: usize) -> &str {
        let start = ceil_boundary(&self.text, self.text.len().saturating_sub(n));
        &self.text[start..]
    }
}

/// Everything a job has written, with the bookkeeping needed for previews,
/// delta polling and paginated reads.
#[derive(Debug, Clone)]
pub struct JobOutput {
    stdout: CappedBuffer,
    stderr: CappedBuffer,
    combined: CappedBuffer,
    tail: String,
    tail_bytes: usize,
    total_output_chars: u64,
}

impl JobOutput {
    /// `max_bytes` caps each of stdout and stderr; the combined stream holds
    /// up to both caps together.
    pub fn new(max_bytes: usize, tail_bytes: usize) -> Self {
        Self {
            stdout: CappedBuffer::new(max_bytes),
            stderr: CappedBuffer::new(max_bytes),
            combined: CappedBuffer::new(max_bytes.saturating_mul(2)),
            tail: String::new(),
            tail_bytes,
            total_output_chars: 0,
        }
    }

    pub fn append(&mut self, stream: OutputStream, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        match stream {
            OutputStream::Stdout => self.stdout.push(chunk),
            OutputStream::Stderr => self.stderr.push(chunk),
        }
        self.combined.push(chunk);
        self.total_output_chars += chunk.len() as u64;
        self.tail = self.combined.last_bytes(self.tail_bytes).to_string();
    }

    pub fn stdout(&self) -> &str {
        self.stdout.as_str()
    }

    pub fn stderr(&self) -> &str {
        self.stderr.as_str()
    }

    pub fn combined(&self) -> &str {
        self.combined.as_str()
    }

    pub fn tail(&self) -> &str {
        &self.tail
    }

    pub fn total_output_chars(&self) -> u64 {
        self.total_output_chars
    }

    pub fn is_truncated(&self) -> bool {
        self.stdout.is_truncated() || self.stderr.is_truncated() || self.combined.is_truncated()
    }

    /// Absolute position just past the newest combined byte.
    pub fn end_position(&self) -> usize {
        self.combined.dropped() + self.combined.len()
    }

    /// Combined output written since absolute position `cursor`.
    ///
    /// Returns the delta and the new cursor. If trimming already discarded
    /// part of the requested range, the delta starts at the oldest retained
    /// byte.
    pub fn delta_since(&self, cursor: usize) -> (String, usize) {
        let text = self.combined.as_str();
        let relative = cursor.saturating_sub(self.combined.dropped());
        let start = floor_boundary(text, relative);
        (text[start..].to_string(), self.end_position())
    }

    /// A page of the retained combined output. `limit` of `None` reads to the
    /// end. Returns the page and the retained length.
    pub fn page(&self, offset: usize, limit: Option<usize>) -> (String, usize) {
        let text = self.combined.as_str();
        let start = floor_boundary(text, offset);
        let end = match limit {
            Some(limit) => {
                let end = floor_boundary(text, start.saturating_add(limit));
                // A limit narrower than the next character still returns it,
                // so paging forward always advances.
                if end == start && limit > 0 {
                    ceil_boundary(text, start + 1)
                } else {
                    end
                }
            }
            None => text.len(),
        };
        (text[start..end].to_string(), text.len())
    }
}
