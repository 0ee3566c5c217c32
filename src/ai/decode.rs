//! Incremental decoding of streamed response bodies.

/// Turns arbitrary byte chunks into valid UTF-8 text, holding back a
/// trailing partial character until the rest of it arrives.
#[derive(Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end; wait for more bytes.
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

    /// Flush whatever is left at end-of-stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Splits a byte stream into newline-terminated lines (without `\r\n`).
#[derive(Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(tail)
    }
}

/// Accumulates `data:` lines of a server-sent event until the blank line
/// that ends it.
#[derive(Default)]
pub struct SseAccumulator {
    data: Option<String>,
}

impl SseAccumulator {
    /// Feed one line; returns the event payload when the event completes.
    pub fn push(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.data.take();
        }
        if let Some(fragment) = parse_sse_line(line) {
            match &mut self.data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(fragment);
                }
                None => self.data = Some(fragment.to_string()),
            }
        }
        None
    }

    pub fn finish(&mut self) -> Option<String> {
        self.data.take()
    }
}

/// The payload of a `data:` line, or `None` for other SSE fields.
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_back_split_characters() {
        let word = "خوش";
        let bytes = word.as_bytes();
        let mut decoder = Utf8Decoder::default();
        let mut out = decoder.push(&bytes[..3]);
        out.push_str(&decoder.push(&bytes[3..]));
        out.push_str(&decoder.finish());
        assert_eq!(out, word);
    }

    #[test]
    fn replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn splits_lines_across_chunks() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"data: {\"a\"").is_empty());
        assert_eq!(lines.push(b":1}\r\n\r\n"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn sse_events_end_at_blank_lines() {
        let mut sse = SseAccumulator::default();
        assert_eq!(sse.push("event: message"), None);
        assert_eq!(sse.push("data: hello"), None);
        assert_eq!(sse.push("data: world"), None);
        assert_eq!(sse.push(""), Some("hello\nworld".to_string()));
        assert_eq!(sse.push(""), None);
    }
}
