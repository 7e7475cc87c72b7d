//! Reusable scratch buffer for frame encoding.
//!
//! Each engine owns exactly one [`WriteBuffer`]. `encode` clears it, writes
//! one frame and lends the bytes out; the borrow ends once the bytes are
//! handed to a [`FrameSink`], so an encoded frame can never be retained
//! across callbacks.
//!
//! # Usage
//!
//! ```
//! use wirebridge::protocol::{Frame, FrameSink, SignalFrame, StreamHeader, WriteBuffer};
//!
//! let mut buffer = WriteBuffer::new();
//! let mut sink: Vec<bytes::Bytes> = Vec::new();
//!
//! let frame = Frame::End(SignalFrame::new(StreamHeader::new(0, 1, 3)));
//! sink.accept(buffer.encode(&frame).unwrap());
//! assert_eq!(sink.len(), 1);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::DEFAULT_MAX_FRAME_SIZE;
use super::Frame;
use crate::error::{GatewayError, Result};

/// Default scratch capacity.
pub const DEFAULT_WRITE_BUFFER_CAPACITY: usize = 64 * 1024;

/// Destination for encoded frames.
pub trait FrameSink {
    /// Accept one encoded frame. The slice is only valid for this call.
    fn accept(&mut self, frame: &[u8]);
}

impl FrameSink for Vec<Bytes> {
    fn accept(&mut self, frame: &[u8]) {
        self.push(Bytes::copy_from_slice(frame));
    }
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn accept(&mut self, frame: &[u8]) {
        (**self).accept(frame);
    }
}

/// Single-owner scratch region frames are encoded into.
pub struct WriteBuffer {
    buf: BytesMut,
    max_frame_size: u32,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WRITE_BUFFER_CAPACITY, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_capacity(capacity: usize, max_frame_size: u32) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            max_frame_size,
        }
    }

    /// Encode a frame, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the encoded frame exceeds the maximum frame size.
    pub fn encode(&mut self, frame: &Frame) -> Result<&[u8]> {
        let len = frame.encoded_len();
        if len > self.max_frame_size as usize {
            return Err(GatewayError::Protocol(format!(
                "{} frame of {} bytes exceeds maximum {}",
                frame.kind(),
                len,
                self.max_frame_size
            )));
        }

        self.buf.clear();
        self.buf.reserve(len);
        frame.encode_into(&mut self.buf);
        Ok(&self.buf[..])
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
