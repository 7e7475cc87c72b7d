//! Type-tagged extension block carried by frames.
//!
//! ```text
//! ┌─────────┬─────────┬───────────┐
//! │ Type ID │ Length  │ Bytes     │
//! │ uint32  │ uint32  │ N bytes   │
//! └─────────┴─────────┴───────────┘
//! ```
//!
//! Type `0` with length `0` is the empty extension.

use bytes::{Buf, BufMut, Bytes};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::MsgPackCodec;
use crate::error::{GatewayError, Result};

/// Encoded size of the extension prefix (type id + length).
pub const EXTENSION_HEADER_SIZE: usize = 8;

/// Opaque extension block. Only binding collaborators interpret the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extension {
    type_id: u32,
    bytes: Bytes,
}

impl Extension {
    /// The empty extension.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap already-encoded bytes.
    pub fn new(type_id: u32, bytes: Bytes) -> Self {
        Self { type_id, bytes }
    }

    /// Encode a typed record as MsgPack under the given type id.
    pub fn encode<T: Serialize>(type_id: u32, value: &T) -> Result<Self> {
        Ok(Self {
            type_id,
            bytes: Bytes::from(MsgPackCodec::encode(value)?),
        })
    }

    /// Decode the bytes as a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.bytes)
    }

    /// Decode only if the type id matches.
    pub fn decode_if<T: DeserializeOwned>(&self, type_id: u32) -> Option<T> {
        if self.type_id != type_id {
            return None;
        }
        self.decode().ok()
    }

    #[inline]
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.type_id == 0 && self.bytes.is_empty()
    }

    /// Size on the wire including the prefix.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        EXTENSION_HEADER_SIZE + self.bytes.len()
    }

    pub(crate) fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.type_id);
        buf.put_u32(self.bytes.len() as u32);
        buf.put_slice(&self.bytes);
    }

    pub(crate) fn decode_from(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < EXTENSION_HEADER_SIZE {
            return Err(GatewayError::Malformed(format!(
                "extension needs {} bytes, {} remaining",
                EXTENSION_HEADER_SIZE,
                buf.remaining()
            )));
        }
        let type_id = buf.get_u32();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(GatewayError::Malformed(format!(
                "extension declares {} bytes, {} remaining",
                len,
                buf.remaining()
            )));
        }
        Ok(Self {
            type_id,
            bytes: buf.split_to(len),
        })
    }
}
