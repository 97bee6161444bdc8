//! Incremental Server-Sent Events decoder.
//!
//! Network chunks arrive at arbitrary boundaries, including in the middle of
//! a multi-byte UTF-8 sequence, so frames are assembled from raw bytes and
//! only decoded once complete.

/// Splits a byte stream into SSE `data` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes of `buffer` already searched for a separator.
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk, returning the data payloads of every frame it
    /// completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some((end, sep_len)) = find_frame_end(&self.buffer, self.scanned) {
            let frame: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            self.scanned = 0;
            if let Some(data) = parse_frame(&frame) {
                payloads.push(data);
            }
        }
        // A separator may straddle the next chunk, so back off its length.
        self.scanned = self.buffer.len().saturating_sub(3);
        payloads
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        parse_frame(&rest)
    }
}

/// Locate the first blank-line separator at or after `from`:
/// `(frame_len, separator_len)`.
fn find_frame_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        if buf[i..].starts_with(b"\n\n") || buf[i..].starts_with(b"\r\r") {
            return Some((i, 2));
        }
        i += 1;
    }
    None
}

/// Join the `data:` lines of one frame. Frames without data yield `None`.
fn parse_frame(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let mut data: Option<String> = None;

    for line in text.lines() {
        // Comment / keep-alive.
        if line.starts_with(':') {
            continue;
        }
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    data.filter(|d| d.trim() != "[DONE]")
}
