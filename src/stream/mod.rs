//! Stream module - stream pairs and the context proxies emit through.
//!
//! A [`StreamPair`] owns the ids, half states and windows of one
//! bidirectional stream. Its `do_*` emitters are guarded by the half state,
//! so calling one twice never writes a frame twice.

mod context;
mod pair;

pub use context::{ProxyContext, Registration};
pub use pair::StreamPair;
