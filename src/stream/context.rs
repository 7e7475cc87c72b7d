//! Per-callback context handed to proxies.

use tracing::warn;

use crate::flow::IdSupplier;
use crate::protocol::{Frame, FrameSink, WriteBuffer};
use crate::proxy::Leg;

/// A downstream pair opened during a callback, to be routed back to its proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub routed_id: u64,
    pub initial_id: u64,
    pub reply_id: u64,
    pub leg: Leg,
}

/// Encoding and id supply for one frame callback.
///
/// Frames are encoded into the engine's scratch buffer and flushed to the
/// sink immediately.
pub struct ProxyContext<'a> {
    buffer: &'a mut WriteBuffer,
    sink: &'a mut dyn FrameSink,
    ids: &'a dyn IdSupplier,
    trace_id: u64,
    registrations: Vec<Registration>,
    written: u64,
}

impl<'a> ProxyContext<'a> {
    pub fn new(
        buffer: &'a mut WriteBuffer,
        sink: &'a mut dyn FrameSink,
        ids: &'a dyn IdSupplier,
        trace_id: u64,
    ) -> Self {
        Self {
            buffer,
            sink,
            ids,
            trace_id,
            registrations: Vec::new(),
            written: 0,
        }
    }

    /// Trace id of the frame being handled.
    #[inline]
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// Encode and flush one frame.
    pub fn write(&mut self, frame: &Frame) {
        match self.buffer.encode(frame) {
            Ok(bytes) => {
                self.sink.accept(bytes);
                self.written += 1;
            }
            Err(e) => {
                warn!(stream = frame.header().stream_id, kind = %frame.kind(), "dropping frame: {}", e);
            }
        }
    }

    /// Allocate an initial/reply id pair on `routed_id`.
    pub fn supply_ids(&self, routed_id: u64) -> (u64, u64) {
        let initial_id = self.ids.supply_initial_id(routed_id);
        (initial_id, self.ids.supply_reply_id(initial_id))
    }

    /// Route frames of a newly opened pair to `leg` of the current proxy.
    pub fn register(&mut self, routed_id: u64, initial_id: u64, reply_id: u64, leg: Leg) {
        self.registrations.push(Registration {
            routed_id,
            initial_id,
            reply_id,
            leg,
        });
    }

    /// Frames written so far.
    #[inline]
    pub fn written(&self) -> u64 {
        self.written
    }

    pub(crate) fn finish(self) -> (Vec<Registration>, u64) {
        (self.registrations, self.written)
    }
}
