//! Codec module - extension blocks and their payload encoding.
//!
//! Every frame may carry a type-tagged [`Extension`]. The engine treats it as
//! opaque bytes; only the protocol collaborators at either end of a bridge
//! decode it. Typed extension records are encoded with [`MsgPackCodec`].
//!
//! # Example
//!
//! ```
//! use wirebridge::codec::{Extension, MsgPackCodec};
//!
//! let ext = Extension::encode(7, &vec!["a", "b"]).unwrap();
//! assert_eq!(ext.type_id(), 7);
//!
//! let items: Vec<String> = ext.decode().unwrap();
//! assert_eq!(items, vec!["a", "b"]);
//!
//! let encoded = MsgPackCodec::encode(&42u32).unwrap();
//! assert_eq!(MsgPackCodec::decode::<u32>(&encoded).unwrap(), 42);
//! ```

mod extension;
mod msgpack;

pub use extension::{Extension, EXTENSION_HEADER_SIZE};
pub use msgpack::MsgPackCodec;
