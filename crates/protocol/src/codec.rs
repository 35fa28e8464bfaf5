//! Newline-delimited framing for change events.
//!
//! Every message on the wire is a payload followed by a single `\n`. The
//! transport may split or coalesce writes arbitrarily, so receivers must
//! accumulate bytes in a [`FrameDecoder`] instead of treating one read as one
//! message.

use crate::event::ChangeEvent;
use thiserror::Error;

/// Byte that terminates every frame.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Default upper bound for a single frame's payload (64 KiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Error type for protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error during communication.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unterminated data grew past the frame size limit.
    #[error("frame too large: {len} bytes without terminator (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// Stream ended in the middle of a frame.
    #[error("stream ended with {len} bytes of an unterminated frame")]
    Truncated { len: usize },

    /// Frame payload is not valid UTF-8.
    #[error("invalid utf-8 in frame: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// One complete frame, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// Raw payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload as UTF-8 text.
    pub fn to_text(&self) -> Result<&str, ProtocolError> {
        std::str::from_utf8(&self.0).map_err(Into::into)
    }

    /// Parse the payload as a [`ChangeEvent`].
    pub fn to_event(&self) -> Result<ChangeEvent, ProtocolError> {
        serde_json::from_slice(&self.0).map_err(Into::into)
    }
}

/// Encode an event as compact JSON followed by the frame terminator.
///
/// Compact JSON never contains a raw newline (string contents are escaped),
/// so the terminator is unambiguous.
pub fn encode(event: &ChangeEvent) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(event)?;
    buf.push(FRAME_TERMINATOR);
    Ok(buf)
}

/// Stateless form of [`FrameDecoder::decode`].
///
/// Appends `new_bytes` to `buffer` and returns the complete frames in arrival
/// order together with the unterminated tail, which the caller passes back in
/// on the next delivery.
pub fn decode(buffer: Vec<u8>, new_bytes: &[u8]) -> Result<(Vec<Frame>, Vec<u8>), ProtocolError> {
    let mut decoder = FrameDecoder::from_buffer(buffer);
    let frames = decoder.decode(new_bytes)?;
    Ok((frames, decoder.into_buffer()))
}

/// Incremental frame decoder.
///
/// Bytes must be fed in the order they were received. After an error the
/// decoder's contents are unspecified and the stream should be dropped.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to contain no terminator.
    scanned: usize,
    max_frame_len: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_frame_len,
        }
    }

    /// Resume decoding from a previously returned tail.
    #[must_use]
    pub fn from_buffer(buffer: Vec<u8>) -> Self {
        Self {
            buf: buffer,
            scanned: 0,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Feed one delivery and return every frame it completes.
    ///
    /// An empty delivery is a no-op. Zero, one or many frames may come out of
    /// a single call; the unterminated remainder stays buffered.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;

        while let Some(offset) = self.buf[search_from..]
            .iter()
            .position(|&b| b == FRAME_TERMINATOR)
        {
            let end = search_from + offset;
            let len = end - start;
            if len > self.max_frame_len {
                return Err(ProtocolError::FrameTooLarge {
                    len,
                    max: self.max_frame_len,
                });
            }
            frames.push(Frame(self.buf[start..end].to_vec()));
            start = end + 1;
            search_from = start;
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len: self.buf.len(),
                max: self.max_frame_len,
            });
        }

        Ok(frames)
    }

    /// Bytes of the current unterminated frame.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }

    /// Signal end of stream. Leftover partial data is an error.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::Truncated {
                len: self.buf.len(),
            })
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
