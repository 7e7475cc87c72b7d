//! Wire format encoding and decoding.
//!
//! Every frame starts with an 8-byte envelope followed by the stream header
//! shared by all frame kinds:
//! ```text
//! ┌─────────┬─────────┬────────┬────────┬────────┬──────────┬─────────────┬─────────┬──────────┬───────────────┐
//! │ Type ID │ Length  │ Origin │ Routed │ Stream │ Sequence │ Acknowledge │ Maximum │ Trace ID │ Authorization │
//! │ uint32  │ uint32  │ uint64 │ uint64 │ uint64 │ uint64   │ uint64      │ uint32  │ uint64   │ uint64        │
//! └─────────┴─────────┴────────┴────────┴────────┴──────────┴─────────────┴─────────┴──────────┴───────────────┘
//! ```
//!
//! `Length` counts the body after the envelope. All multi-byte integers are
//! Big Endian.

use bytes::{Buf, BufMut};

use crate::error::{GatewayError, Result};

/// Envelope size in bytes (type id + body length).
pub const ENVELOPE_SIZE: usize = 8;

/// Stream header size in bytes.
pub const STREAM_HEADER_SIZE: usize = 60;

/// Default maximum encoded frame size (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65_536;

/// Absolute maximum encoded frame size (16 MB).
pub const ABSOLUTE_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Frame type identifiers.
pub mod type_id {
    /// Opens a stream half.
    pub const BEGIN: u32 = 0x0000_0001;
    /// Carries payload.
    pub const DATA: u32 = 0x0000_0002;
    /// Graceful close of a stream half.
    pub const END: u32 = 0x0000_0003;
    /// Abnormal, sender-initiated close.
    pub const ABORT: u32 = 0x0000_0004;
    /// Out-of-band flush signal in the data direction.
    pub const FLUSH: u32 = 0x0000_0005;
    /// Abnormal, receiver-initiated close.
    pub const RESET: u32 = 0x4000_0001;
    /// Credit grant from the receiver.
    pub const WINDOW: u32 = 0x4000_0002;
    /// Receiver challenge against the data direction.
    pub const CHALLENGE: u32 = 0x4000_0003;
}

/// DATA flag constants.
pub mod flags {
    /// Final fragment of a message.
    pub const FIN: u8 = 0b0000_0001;
    /// Initial fragment of a message.
    pub const INIT: u8 = 0b0000_0010;
    /// Message is incomplete and should be discarded by the receiver.
    pub const INCOMPLETE: u8 = 0b0000_0100;

    /// Reserved bits mask (bits 3-7).
    pub const RESERVED_MASK: u8 = 0b1111_1000;

    /// Both INIT and FIN: a message carried in a single fragment.
    pub const COMPLETE: u8 = INIT | FIN;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// WINDOW capability bits.
pub mod capabilities {
    /// Stream accepts challenges.
    pub const CHALLENGE: u8 = 0b0000_0001;
    /// Only produce operations allowed.
    pub const PRODUCE_ONLY: u8 = 0b0000_0010;
    /// Only fetch operations allowed.
    pub const FETCH_ONLY: u8 = 0b0000_0100;
}

/// Header fields carried by every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamHeader {
    /// Binding the stream originated from.
    pub origin_id: u64,
    /// Binding the stream is routed to.
    pub routed_id: u64,
    /// Stream identifier (odd = initial, even = reply).
    pub stream_id: u64,
    /// Sender position.
    pub sequence: u64,
    /// Receiver acknowledged position.
    pub acknowledge: u64,
    /// Receiver credit limit.
    pub maximum: u32,
    /// Trace correlation for diagnostics.
    pub trace_id: u64,
    /// Authorization token of the principal.
    pub authorization: u64,
}

impl StreamHeader {
    /// Create a header addressing a stream with an empty window.
    pub fn new(origin_id: u64, routed_id: u64, stream_id: u64) -> Self {
        Self {
            origin_id,
            routed_id,
            stream_id,
            ..Self::default()
        }
    }

    /// Set the window positions.
    pub fn window(mut self, sequence: u64, acknowledge: u64, maximum: u32) -> Self {
        self.sequence = sequence;
        self.acknowledge = acknowledge;
        self.maximum = maximum;
        self
    }

    /// Set the trace id.
    pub fn trace(mut self, trace_id: u64) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Set the authorization.
    pub fn authorization(mut self, authorization: u64) -> Self {
        self.authorization = authorization;
        self
    }

    /// Check if this header addresses an initial (request) stream.
    #[inline]
    pub fn is_initial(&self) -> bool {
        is_initial(self.stream_id)
    }

    /// Encode the header into a buffer.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.origin_id);
        buf.put_u64(self.routed_id);
        buf.put_u64(self.stream_id);
        buf.put_u64(self.sequence);
        buf.put_u64(self.acknowledge);
        buf.put_u32(self.maximum);
        buf.put_u64(self.trace_id);
        buf.put_u64(self.authorization);
    }

    /// Decode a header from a buffer.
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        require(buf, STREAM_HEADER_SIZE, "stream header")?;
        Ok(Self {
            origin_id: buf.get_u64(),
            routed_id: buf.get_u64(),
            stream_id: buf.get_u64(),
            sequence: buf.get_u64(),
            acknowledge: buf.get_u64(),
            maximum: buf.get_u32(),
            trace_id: buf.get_u64(),
            authorization: buf.get_u64(),
        })
    }
}

/// Check if a stream id is an initial (request direction) id.
#[inline]
pub fn is_initial(stream_id: u64) -> bool {
    stream_id & 0x01 != 0
}

/// Peek the envelope of an encoded frame.
///
/// Returns `(type_id, body_length)` or `None` if the buffer is too short.
pub fn decode_envelope(buf: &[u8]) -> Option<(u32, u32)> {
    if buf.len() < ENVELOPE_SIZE {
        return None;
    }
    let mut cursor = buf;
    Some((cursor.get_u32(), cursor.get_u32()))
}

/// Ensure at least `len` bytes remain.
pub(crate) fn require(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(GatewayError::Malformed(format!(
            "{} needs {} bytes, {} remaining",
            what,
            len,
            buf.remaining()
        )));
    }
    Ok(())
}
