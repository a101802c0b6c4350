//! Incremental line-delimited JSON parser
//!
//! Turns an arbitrary byte stream, fed in chunks, into a sequence of parsed
//! JSON objects. No schema knowledge; purely byte → object.
//!
//! # Error Handling
//!
//! - **Split lines**: a chunk boundary may land mid-line; the partial tail is
//!   buffered and prepended to the next chunk.
//! - **Malformed JSON lines**: logged at debug, counted, skipped. A single
//!   bad line never aborts the stream or loses subsequent valid lines.
//! - **Invalid UTF-8**: decoded lossily before JSON parsing, so a stray byte
//!   degrades one line rather than the stream.

use serde_json::Value;

/// Incremental parser state. Create one per byte stream.
#[derive(Debug, Default)]
pub struct LineParser {
    /// Partial final line carried across `feed` calls
    buffer: Vec<u8>,
    /// 1-based number of the last completed line
    line_number: u64,
    lines_parsed: u64,
    lines_skipped: u64,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of bytes, invoking `on_object` once per complete,
    /// well-formed JSON line with that line's 1-based sequential number.
    pub fn feed<F>(&mut self, chunk: &[u8], on_object: &mut F)
    where
        F: FnMut(u64, Value),
    {
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            // Drop the trailing newline (and a CR before it, if present)
            let end = line.len() - 1;
            let end = if end > 0 && line[end - 1] == b'\r' {
                end - 1
            } else {
                end
            };
            self.handle_line(&line[..end], on_object);
        }
    }

    /// Force parsing of any trailing unterminated line.
    pub fn flush<F>(&mut self, on_object: &mut F)
    where
        F: FnMut(u64, Value),
    {
        if self.buffer.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.buffer);
        self.handle_line(&line, on_object);
    }

    fn handle_line<F>(&mut self, line: &[u8], on_object: &mut F)
    where
        F: FnMut(u64, Value),
    {
        self.line_number += 1;

        let text = String::from_utf8_lossy(line);
        if text.trim().is_empty() {
            return;
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                self.lines_parsed += 1;
                on_object(self.line_number, value);
            }
            Err(e) => {
                self.lines_skipped += 1;
                tracing::debug!(line = self.line_number, error = %e, "skipping malformed line");
            }
        }
    }

    /// Clear all buffered state; required when switching input files.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.line_number = 0;
        self.lines_parsed = 0;
        self.lines_skipped = 0;
    }

    /// Number of lines successfully parsed so far.
    pub fn lines_parsed(&self) -> u64 {
        self.lines_parsed
    }

    /// Number of malformed lines skipped so far.
    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_all(chunks: &[&[u8]]) -> Vec<(u64, Value)> {
        let mut parser = LineParser::new();
        let mut out = Vec::new();
        for chunk in chunks {
            parser.feed(chunk, &mut |n, v| out.push((n, v)));
        }
        parser.flush(&mut |n, v| out.push((n, v)));
        out
    }

    #[test]
    fn test_single_chunk() {
        let out = collect_all(&[b"{\"a\":1}\n{\"b\":2}\n"]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, 1);
        assert_eq!(out[0].1["a"], 1);
        assert_eq!(out[1].0, 2);
        assert_eq!(out[1].1["b"], 2);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let out = collect_all(&[b"{\"a\":", b"1}\n"]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1["a"], 1);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_output() {
        let bytes = b"{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n";
        let whole = collect_all(&[bytes.as_slice()]);

        // Re-feed one byte at a time
        let mut parser = LineParser::new();
        let mut out = Vec::new();
        for b in bytes {
            parser.feed(&[*b], &mut |n, v| out.push((n, v)));
        }
        parser.flush(&mut |n, v| out.push((n, v)));

        assert_eq!(whole, out);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let out = collect_all(&[b"{\"a\":1}\n{bad\n{\"a\":2}\n"]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].1["a"], 1);
        assert_eq!(out[1].1["a"], 2);
        // Line numbers still advance past the bad line
        assert_eq!(out[1].0, 3);
    }

    #[test]
    fn test_flush_parses_unterminated_line() {
        let mut parser = LineParser::new();
        let mut out = Vec::new();
        parser.feed(b"{\"a\":1}", &mut |n, v| out.push((n, v)));
        assert!(out.is_empty());
        parser.flush(&mut |n, v| out.push((n, v)));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1["a"], 1);
    }

    #[test]
    fn test_crlf_lines() {
        let out = collect_all(&[b"{\"a\":1}\r\n{\"b\":2}\r\n"]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_empty_lines_ignored() {
        let out = collect_all(&[b"\n\n{\"a\":1}\n\n"]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 3);
    }

    #[test]
    fn test_counters() {
        let mut parser = LineParser::new();
        parser.feed(b"{\"a\":1}\n{bad\n", &mut |_, _| {});
        assert_eq!(parser.lines_parsed(), 1);
        assert_eq!(parser.lines_skipped(), 1);
        parser.reset();
        assert_eq!(parser.lines_parsed(), 0);
        assert_eq!(parser.lines_skipped(), 0);
    }
}
