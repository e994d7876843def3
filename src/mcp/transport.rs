//! Low-level MCP wire framing with high fault tolerance.
//!
//! Input accepts both `Content-Length: N\r\n\r\n<body>` frames and one
//! JSON object per line (JSONL); the reader skips leading noise (logs,
//! partial lines) until the next valid frame or JSON object. Invalid
//! Content-Length declarations (zero, negative, oversized) are rejected
//! without consuming the claimed bytes, and a body truncated by EOF
//! yields no message.

use serde_json::Value;
use std::io::{BufRead, Read, Write};

/// Hard cap on one message body.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Wire framing of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    ContentLength,
    Jsonl,
}

/// Robust frame reader over any buffered input.
pub struct FrameReader<R: BufRead> {
    input: R,
    allow_jsonl: bool,
}

impl<R: BufRead> FrameReader<R> {
    #[must_use]
    pub fn new(input: R) -> Self {
        Self {
            input,
            allow_jsonl: true,
        }
    }

    #[must_use]
    pub fn with_jsonl(input: R, allow_jsonl: bool) -> Self {
        Self { input, allow_jsonl }
    }

    /// Reads the next message, skipping noise. `None` means EOF.
    pub fn read_message(&mut self) -> Option<(Value, FrameMode)> {
        loop {
            let line = self.read_line()?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed.starts_with('{') {
                if self.allow_jsonl {
                    if let Some(msg) = parse_json_object(trimmed) {
                        return Some((msg, FrameMode::Jsonl));
                    }
                }
                continue;
            }

            if trimmed.to_ascii_lowercase().starts_with("content-length:") {
                let Some(content_length) = self.parse_headers(trimmed) else {
                    continue;
                };
                if content_length == 0 || content_length > MAX_MESSAGE_SIZE {
                    continue;
                }
                let mut body = vec![0u8; content_length];
                if self.input.read_exact(&mut body).is_err() {
                    // Body truncated at EOF: no invocation.
                    return None;
                }
                let text = String::from_utf8_lossy(&body);
                if let Some(msg) = parse_json_object(text.trim()) {
                    return Some((msg, FrameMode::ContentLength));
                }
                continue;
            }

            // Anything else is noise between frames; keep looking.
        }
    }

    /// Parses the first header line plus any continuation headers up to
    /// the blank separator. Returns `None` for malformed declarations
    /// (including negative lengths).
    fn parse_headers(&mut self, first_line: &str) -> Option<usize> {
        let mut content_length: Option<i64> = None;
        let (key, value) = first_line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            content_length = value.trim().parse().ok();
        }
        loop {
            let Some(line) = self.read_line() else { break };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((key, value)) = trimmed.split_once(':') {
                if key.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok();
                }
            }
        }
        match content_length {
            Some(n) if n >= 0 => Some(n as usize),
            _ => None,
        }
    }

    fn read_line(&mut self) -> Option<String> {
        let mut buf = Vec::new();
        match self.input.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => Some(String::from_utf8_lossy(&buf).into_owned()),
            Err(_) => None,
        }
    }
}

fn parse_json_object(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.is_object().then_some(value)
}

/// Writes one message in the requested framing. The caller serializes
/// concurrent writers (one mutex on the output stream).
pub fn write_message<W: Write>(
    output: &mut W,
    message: &Value,
    mode: FrameMode,
) -> std::io::Result<()> {
    let body = serde_json::to_string(message)?;
    match mode {
        FrameMode::Jsonl => {
            output.write_all(body.as_bytes())?;
            output.write_all(b"\n")?;
        }
        FrameMode::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            output.write_all(header.as_bytes())?;
            output.write_all(body.as_bytes())?;
        }
    }
    output.flush()
}
