//! Typed frames.
//!
//! Each of the eight frame kinds shares the [`StreamHeader`] and adds its
//! own tail. Payload and extension bytes are `bytes::Bytes`, so decoding
//! a frame out of a read buffer does not copy them.
//!
//! # Example
//!
//! ```
//! use wirebridge::protocol::{flags, DataFrame, Frame, FrameKind, StreamHeader};
//! use bytes::Bytes;
//!
//! let header = StreamHeader::new(0, 1, 3).window(0, 0, 8192);
//! let frame = Frame::Data(
//!     DataFrame::new(header, flags::COMPLETE, Bytes::from_static(b"hello")).reserved(5),
//! );
//!
//! assert_eq!(frame.kind(), FrameKind::Data);
//! assert_eq!(frame.header().stream_id, 3);
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use super::wire_format::{
    capabilities, flags, require, type_id, StreamHeader, ENVELOPE_SIZE, STREAM_HEADER_SIZE,
};
use crate::codec::Extension;
use crate::error::{GatewayError, Result};

/// Frame kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Begin,
    Data,
    End,
    Abort,
    Flush,
    Window,
    Reset,
    Challenge,
}

impl FrameKind {
    /// Wire type id of this kind.
    pub fn type_id(self) -> u32 {
        match self {
            FrameKind::Begin => type_id::BEGIN,
            FrameKind::Data => type_id::DATA,
            FrameKind::End => type_id::END,
            FrameKind::Abort => type_id::ABORT,
            FrameKind::Flush => type_id::FLUSH,
            FrameKind::Window => type_id::WINDOW,
            FrameKind::Reset => type_id::RESET,
            FrameKind::Challenge => type_id::CHALLENGE,
        }
    }

    /// Kind for a wire type id.
    pub fn from_type_id(id: u32) -> Option<Self> {
        match id {
            type_id::BEGIN => Some(FrameKind::Begin),
            type_id::DATA => Some(FrameKind::Data),
            type_id::END => Some(FrameKind::End),
            type_id::ABORT => Some(FrameKind::Abort),
            type_id::FLUSH => Some(FrameKind::Flush),
            type_id::WINDOW => Some(FrameKind::Window),
            type_id::RESET => Some(FrameKind::Reset),
            type_id::CHALLENGE => Some(FrameKind::Challenge),
            _ => None,
        }
    }

    /// Kinds sent by the receiver of a half, travelling against the data direction.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            FrameKind::Window | FrameKind::Reset | FrameKind::Challenge
        )
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Begin => "BEGIN",
            FrameKind::Data => "DATA",
            FrameKind::End => "END",
            FrameKind::Abort => "ABORT",
            FrameKind::Flush => "FLUSH",
            FrameKind::Window => "WINDOW",
            FrameKind::Reset => "RESET",
            FrameKind::Challenge => "CHALLENGE",
        };
        f.write_str(name)
    }
}

/// Opens a stream half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginFrame {
    pub header: StreamHeader,
    /// Placement hint.
    pub affinity: u64,
    pub extension: Extension,
}

impl BeginFrame {
    pub fn new(header: StreamHeader) -> Self {
        Self {
            header,
            affinity: 0,
            extension: Extension::empty(),
        }
    }

    pub fn affinity(mut self, affinity: u64) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.extension = extension;
        self
    }
}

/// Carries one payload fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub header: StreamHeader,
    pub flags: u8,
    pub budget_id: u64,
    /// Credit consumed by this fragment, payload plus padding.
    pub reserved: u32,
    pub payload: Bytes,
    pub extension: Extension,
}

impl DataFrame {
    /// Create a fragment reserving exactly its payload length.
    pub fn new(header: StreamHeader, flags: u8, payload: Bytes) -> Self {
        Self {
            header,
            flags,
            budget_id: 0,
            reserved: payload.len() as u32,
            payload,
            extension: Extension::empty(),
        }
    }

    pub fn budget_id(mut self, budget_id: u64) -> Self {
        self.budget_id = budget_id;
        self
    }

    pub fn reserved(mut self, reserved: u32) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.extension = extension;
        self
    }

    #[inline]
    pub fn is_init(&self) -> bool {
        flags::has_flag(self.flags, flags::INIT)
    }

    #[inline]
    pub fn is_fin(&self) -> bool {
        flags::has_flag(self.flags, flags::FIN)
    }

    #[inline]
    pub fn is_incomplete(&self) -> bool {
        flags::has_flag(self.flags, flags::INCOMPLETE)
    }
}

/// Out-of-band flush, travels with the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushFrame {
    pub header: StreamHeader,
    pub budget_id: u64,
    pub reserved: u32,
    pub extension: Extension,
}

impl FlushFrame {
    pub fn new(header: StreamHeader) -> Self {
        Self {
            header,
            budget_id: 0,
            reserved: 0,
            extension: Extension::empty(),
        }
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.extension = extension;
        self
    }
}

/// Credit grant from the receiver. The header's `acknowledge` and `maximum`
/// carry the new window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFrame {
    pub header: StreamHeader,
    pub budget_id: u64,
    pub padding: u32,
    pub capabilities: u8,
}

impl WindowFrame {
    pub fn new(header: StreamHeader) -> Self {
        Self {
            header,
            budget_id: 0,
            padding: 0,
            capabilities: 0,
        }
    }

    pub fn budget_id(mut self, budget_id: u64) -> Self {
        self.budget_id = budget_id;
        self
    }

    pub fn padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }

    pub fn capabilities(mut self, capabilities: u8) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[inline]
    pub fn accepts_challenge(&self) -> bool {
        self.capabilities & capabilities::CHALLENGE != 0
    }
}

/// Tail shared by END, ABORT, RESET and CHALLENGE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalFrame {
    pub header: StreamHeader,
    pub extension: Extension,
}

impl SignalFrame {
    pub fn new(header: StreamHeader) -> Self {
        Self {
            header,
            extension: Extension::empty(),
        }
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.extension = extension;
        self
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Begin(BeginFrame),
    Data(DataFrame),
    End(SignalFrame),
    Abort(SignalFrame),
    Flush(FlushFrame),
    Window(WindowFrame),
    Reset(SignalFrame),
    Challenge(SignalFrame),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Begin(_) => FrameKind::Begin,
            Frame::Data(_) => FrameKind::Data,
            Frame::End(_) => FrameKind::End,
            Frame::Abort(_) => FrameKind::Abort,
            Frame::Flush(_) => FrameKind::Flush,
            Frame::Window(_) => FrameKind::Window,
            Frame::Reset(_) => FrameKind::Reset,
            Frame::Challenge(_) => FrameKind::Challenge,
        }
    }

    #[inline]
    pub fn type_id(&self) -> u32 {
        self.kind().type_id()
    }

    pub fn header(&self) -> &StreamHeader {
        match self {
            Frame::Begin(f) => &f.header,
            Frame::Data(f) => &f.header,
            Frame::Flush(f) => &f.header,
            Frame::Window(f) => &f.header,
            Frame::End(f) | Frame::Abort(f) | Frame::Reset(f) | Frame::Challenge(f) => &f.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut StreamHeader {
        match self {
            Frame::Begin(f) => &mut f.header,
            Frame::Data(f) => &mut f.header,
            Frame::Flush(f) => &mut f.header,
            Frame::Window(f) => &mut f.header,
            Frame::End(f) | Frame::Abort(f) | Frame::Reset(f) | Frame::Challenge(f) => {
                &mut f.header
            }
        }
    }

    /// Extension carried by the frame, if the kind has one.
    pub fn extension(&self) -> Option<&Extension> {
        match self {
            Frame::Begin(f) => Some(&f.extension),
            Frame::Data(f) => Some(&f.extension),
            Frame::Flush(f) => Some(&f.extension),
            Frame::Window(_) => None,
            Frame::End(f) | Frame::Abort(f) | Frame::Reset(f) | Frame::Challenge(f) => {
                Some(&f.extension)
            }
        }
    }

    /// Body length after the envelope.
    pub fn body_len(&self) -> usize {
        let tail = match self {
            Frame::Begin(f) => 8 + f.extension.encoded_len(),
            Frame::Data(f) => 1 + 8 + 4 + 4 + f.payload.len() + f.extension.encoded_len(),
            Frame::Flush(f) => 8 + 4 + f.extension.encoded_len(),
            Frame::Window(_) => 8 + 4 + 1,
            Frame::End(f) | Frame::Abort(f) | Frame::Reset(f) | Frame::Challenge(f) => {
                f.extension.encoded_len()
            }
        };
        STREAM_HEADER_SIZE + tail
    }

    /// Total encoded length including the envelope.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_SIZE + self.body_len()
    }

    /// Encode envelope and body into a buffer.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.type_id());
        buf.put_u32(self.body_len() as u32);
        self.header().encode_into(buf);

        match self {
            Frame::Begin(f) => {
                buf.put_u64(f.affinity);
                f.extension.encode_into(buf);
            }
            Frame::Data(f) => {
                buf.put_u8(f.flags);
                buf.put_u64(f.budget_id);
                buf.put_u32(f.reserved);
                buf.put_u32(f.payload.len() as u32);
                buf.put_slice(&f.payload);
                f.extension.encode_into(buf);
            }
            Frame::Flush(f) => {
                buf.put_u64(f.budget_id);
                buf.put_u32(f.reserved);
                f.extension.encode_into(buf);
            }
            Frame::Window(f) => {
                buf.put_u64(f.budget_id);
                buf.put_u32(f.padding);
                buf.put_u8(f.capabilities);
            }
            Frame::End(f) | Frame::Abort(f) | Frame::Reset(f) | Frame::Challenge(f) => {
                f.extension.encode_into(buf);
            }
        }
    }

    /// Decode a frame body (the bytes after the envelope).
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for an unknown type id and `Malformed` for a
    /// truncated body, reserved DATA flag bits or trailing bytes.
    pub fn decode(type_id: u32, mut body: Bytes) -> Result<Self> {
        let kind = FrameKind::from_type_id(type_id).ok_or_else(|| {
            GatewayError::Protocol(format!("unknown frame type 0x{:08x}", type_id))
        })?;

        let header = StreamHeader::decode(&mut &body[..])?;
        body.advance(STREAM_HEADER_SIZE);

        let frame = match kind {
            FrameKind::Begin => {
                require(&body, 8, "BEGIN")?;
                let affinity = body.get_u64();
                let extension = Extension::decode_from(&mut body)?;
                Frame::Begin(BeginFrame {
                    header,
                    affinity,
                    extension,
                })
            }
            FrameKind::Data => {
                require(&body, 1 + 8 + 4 + 4, "DATA")?;
                let flags = body.get_u8();
                if flags & flags::RESERVED_MASK != 0 {
                    return Err(GatewayError::Malformed(format!(
                        "reserved DATA flag bits set: 0x{:02x}",
                        flags
                    )));
                }
                let budget_id = body.get_u64();
                let reserved = body.get_u32();
                let len = body.get_u32() as usize;
                require(&body, len, "DATA payload")?;
                let payload = body.split_to(len);
                let extension = Extension::decode_from(&mut body)?;
                Frame::Data(DataFrame {
                    header,
                    flags,
                    budget_id,
                    reserved,
                    payload,
                    extension,
                })
            }
            FrameKind::Flush => {
                require(&body, 8 + 4, "FLUSH")?;
                let budget_id = body.get_u64();
                let reserved = body.get_u32();
                let extension = Extension::decode_from(&mut body)?;
                Frame::Flush(FlushFrame {
                    header,
                    budget_id,
                    reserved,
                    extension,
                })
            }
            FrameKind::Window => {
                require(&body, 8 + 4 + 1, "WINDOW")?;
                Frame::Window(WindowFrame {
                    header,
                    budget_id: body.get_u64(),
                    padding: body.get_u32(),
                    capabilities: body.get_u8(),
                })
            }
            FrameKind::End | FrameKind::Abort | FrameKind::Reset | FrameKind::Challenge => {
                let signal = SignalFrame {
                    header,
                    extension: Extension::decode_from(&mut body)?,
                };
                match kind {
                    FrameKind::End => Frame::End(signal),
                    FrameKind::Abort => Frame::Abort(signal),
                    FrameKind::Reset => Frame::Reset(signal),
                    _ => Frame::Challenge(signal),
                }
            }
        };

        if !body.is_empty() {
            return Err(GatewayError::Malformed(format!(
                "{} frame has {} trailing bytes",
                kind,
                body.len()
            )));
        }

        Ok(frame)
    }
}
