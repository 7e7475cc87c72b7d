//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary stream protocol:
//! - 8-byte envelope and 60-byte stream header encoding/decoding
//! - Typed frames for the eight frame kinds
//! - Frame buffer for accumulating partial reads
//! - Write buffer and sink for outbound encoding

mod frame;
mod frame_buffer;
mod wire_format;
mod write_buffer;

pub use frame::{
    BeginFrame, DataFrame, FlushFrame, Frame, FrameKind, SignalFrame, WindowFrame,
};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    capabilities, decode_envelope, flags, is_initial, type_id, StreamHeader,
    ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE, ENVELOPE_SIZE, STREAM_HEADER_SIZE,
};
pub use write_buffer::{FrameSink, WriteBuffer, DEFAULT_WRITE_BUFFER_CAPACITY};
