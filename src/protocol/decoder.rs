//! Frame Decoder
//!
//! Turns an arbitrarily chunked byte stream of `text/event-stream` data into
//! discrete frames. A frame is one blank-line-delimited block; its `data:`
//! lines are joined and the `[DONE]` sentinel is recognized as its own frame
//! kind. The decoder never fails: undecodable blocks become malformed frames
//! so the classifier can handle them uniformly.

use crate::error::StreamError;
use tracing::{debug, warn};

/// Default upper bound for one buffered frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const DONE_SENTINEL: &str = "[DONE]";

/// Payload of one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// Joined `data:` text, expected to be JSON
    Data(String),
    /// The terminal `[DONE]` sentinel
    Done,
    /// Block that could not be decoded into text
    Malformed(StreamError),
}

/// One logical unit of the wire stream
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Byte offset of the frame's block within the stream
    pub offset: u64,
    pub payload: FramePayload,
}

impl Frame {
    /// Wrap a complete non-streaming response body as a single frame.
    pub fn body(text: impl Into<String>) -> Self {
        Self {
            offset: 0,
            payload: FramePayload::Data(text.into()),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.payload, FramePayload::Done)
    }
}

/// Incremental decoder holding bytes until a frame delimiter is seen
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Stream offset of `buffer[0]`
    consumed: u64,
    /// Position in `buffer` where the next delimiter scan starts
    scan_from: usize,
    max_frame_bytes: usize,
    /// Set after an oversized frame until its delimiter is seen
    discarding: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            consumed: 0,
            scan_from: 0,
            max_frame_bytes: max_frame_bytes.max(1),
            discarding: false,
        }
    }

    /// Number of bytes held waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one network read; returns every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some((end, delimiter_len)) = find_delimiter(&self.buffer, self.scan_from) {
            let offset = self.consumed;
            let block: Vec<u8> = self.buffer.drain(..end + delimiter_len).take(end).collect();
            self.consumed += (end + delimiter_len) as u64;
            self.scan_from = 0;

            if self.discarding {
                self.discarding = false;
                debug!(offset, "Dropped tail of oversized frame");
                continue;
            }
            if let Some(frame) = parse_block(&block, offset) {
                frames.push(frame);
            }
        }

        // A delimiter may straddle this read and the next one.
        self.scan_from = self.buffer.len().saturating_sub(2);

        if self.buffer.len() > self.max_frame_bytes {
            // Keep a possible delimiter prefix so a blank line split across
            // reads still ends the discarded frame.
            let dropped = self.buffer.len().saturating_sub(2);
            self.consumed += dropped as u64;
            self.buffer.drain(..dropped);
            self.scan_from = 0;
            if !self.discarding {
                self.discarding = true;
                warn!(
                    limit = self.max_frame_bytes,
                    dropped, "Frame exceeded size limit, discarding until next delimiter"
                );
                frames.push(Frame {
                    offset: self.consumed - dropped as u64,
                    payload: FramePayload::Malformed(StreamError::FrameTooLarge {
                        limit: self.max_frame_bytes,
                    }),
                });
            }
        }

        frames
    }

    /// Flush a trailing block that was never delimited (end of stream).
    pub fn finish(&mut self) -> Vec<Frame> {
        let offset = self.consumed;
        let block = std::mem::take(&mut self.buffer);
        self.consumed += block.len() as u64;
        self.scan_from = 0;
        if std::mem::take(&mut self.discarding) {
            return Vec::new();
        }
        parse_block(&block, offset).into_iter().collect()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the first blank line at or after `from`: `\n\n` or `\n\r\n`.
/// Returns the block end and the delimiter length.
fn find_delimiter(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buffer.len() {
        if buffer[i] == b'\n' {
            match (buffer.get(i + 1), buffer.get(i + 2)) {
                (Some(b'\n'), _) => return Some((i, 2)),
                (Some(b'\r'), Some(b'\n')) => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn parse_block(block: &[u8], offset: u64) -> Option<Frame> {
    let text = match std::str::from_utf8(block) {
        Ok(text) => text,
        Err(_) => {
            return Some(Frame {
                offset,
                payload: FramePayload::Malformed(StreamError::InvalidEncoding {
                    raw: String::from_utf8_lossy(block).into_owned(),
                }),
            });
        }
    };

    let mut data_lines: Vec<&str> = Vec::new();
    let mut stray = false;
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.starts_with("event:")
            || line.starts_with("id:")
            || line.starts_with("retry:")
        {
            continue;
        } else {
            stray = true;
        }
    }

    if data_lines.is_empty() {
        if stray {
            return Some(Frame {
                offset,
                payload: FramePayload::Malformed(StreamError::FrameParse {
                    reason: "block has no data field".to_string(),
                    raw: text.to_string(),
                }),
            });
        }
        // keep-alive
        return None;
    }

    let data = data_lines.join("\n");
    let payload = if data.trim() == DONE_SENTINEL {
        FramePayload::Done
    } else {
        FramePayload::Data(data)
    };
    Some(Frame { offset, payload })
}
