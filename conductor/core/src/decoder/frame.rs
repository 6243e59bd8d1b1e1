//! Line Framing
//!
//! Body bytes arrive in arbitrary chunks. [`LineBuffer`] reassembles them into
//! complete lines, and [`SseLine`] classifies a line of an SSE body.
//!
//! A chunk boundary may fall in the middle of a line or in the middle of a
//! multi-byte UTF-8 sequence; lines are only converted to text once the
//! terminating `\n` has arrived, so neither case corrupts the output.

/// Minimum buffer capacity
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Reassembles newline-terminated lines from byte chunks
#[derive(Debug)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete line, without its terminator
    ///
    /// A trailing `\r` is stripped so CRLF bodies decode like LF bodies.
    pub fn next_line(&mut self) -> Option<String> {
        let pending = &self.buffer[self.read_pos..];
        let newline = pending.iter().position(|&b| b == b'\n')?;

        let mut line = &pending[..newline];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        let text = String::from_utf8_lossy(line).into_owned();
        self.read_pos += newline + 1;
        Some(text)
    }

    /// Take whatever is left once the body has ended
    ///
    /// Returns `None` when the remainder is empty or only whitespace.
    pub fn take_remainder(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buffer[self.read_pos..]).into_owned();
        self.clear();
        let trimmed = rest.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Number of unconsumed bytes
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

/// One line of an SSE body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// `data:` payload with the optional single leading space removed
    Data(&'a str),
    /// `event:` name
    Event(&'a str),
    /// Blank line, comment, or a field we don't use (`id:`, `retry:`)
    Ignored,
}

impl<'a> SseLine<'a> {
    /// Classify a single SSE line
    #[must_use]
    pub fn parse(line: &'a str) -> Self {
        if let Some(rest) = line.strip_prefix("data:") {
            return Self::Data(rest.strip_prefix(' ').unwrap_or(rest));
        }
        if let Some(rest) = line.strip_prefix("event:") {
            return Self::Event(rest.trim());
        }
        Self::Ignored
    }
}
