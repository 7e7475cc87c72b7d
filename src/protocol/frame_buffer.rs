//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForEnvelope`: Need at least 8 bytes
//! - `WaitingForBody`: Envelope parsed, need N more body bytes
//!
//! # Example
//!
//! ```ignore
//! use wirebridge::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the transport
//! let frames = buffer.push(&chunk)?;
//!
//! for frame in frames {
//!     println!("Got {} on stream {}", frame.kind(), frame.header().stream_id);
//! }
//! ```

use bytes::BytesMut;

use super::wire_format::{decode_envelope, DEFAULT_MAX_FRAME_SIZE, ENVELOPE_SIZE, STREAM_HEADER_SIZE};
use super::Frame;
use crate::error::{GatewayError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete envelope (need 8 bytes).
    WaitingForEnvelope,
    /// Envelope parsed, waiting for body bytes.
    WaitingForBody { type_id: u32, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed encoded frame size.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 64KB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForEnvelope,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a frame exceeds `max_frame_size` or cannot be decoded.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();

        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForEnvelope => {
                let Some((type_id, length)) = decode_envelope(&self.buffer) else {
                    return Ok(None);
                };

                let total = ENVELOPE_SIZE as u64 + length as u64;
                if total > self.max_frame_size as u64 {
                    return Err(GatewayError::Protocol(format!(
                        "Frame size {} exceeds maximum {}",
                        total, self.max_frame_size
                    )));
                }
                if (length as usize) < STREAM_HEADER_SIZE {
                    return Err(GatewayError::Malformed(format!(
                        "frame body of {} bytes is shorter than the stream header",
                        length
                    )));
                }

                let _ = self.buffer.split_to(ENVELOPE_SIZE);
                self.state = State::WaitingForBody {
                    type_id,
                    remaining: length,
                };

                self.try_extract_one()
            }

            State::WaitingForBody { type_id, remaining } => {
                let remaining = remaining as usize;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForEnvelope;

                Frame::decode(type_id, body).map(Some)
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForEnvelope;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForEnvelope => "WaitingForEnvelope",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
