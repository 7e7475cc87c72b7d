//! Shared helpers for driving a [`StreamEngine`] with encoded frames.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use tracing_subscriber::EnvFilter;
use wirebridge::binding::{HeaderEntry, RequestBeginEx, REQUEST_TYPE_ID};
use wirebridge::codec::Extension;
use wirebridge::flow::SequentialIds;
use wirebridge::protocol::{Frame, FrameBuffer, FrameKind, StreamHeader, WriteBuffer};
use wirebridge::{BindingConfig, RouteTable, StreamEngine};

/// Routed id of the upstream binding.
pub const ROUTED: u64 = 1;

/// Routed id of the downstream exit.
pub const EXIT: u64 = 2;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine over the given binding JSON, allocating downstream ids from 101.
pub fn engine(bindings: &[&str]) -> StreamEngine<Vec<Bytes>> {
    init_tracing();
    let table = RouteTable::with_bindings(
        bindings
            .iter()
            .map(|json| BindingConfig::from_json(json).unwrap()),
    )
    .unwrap();
    StreamEngine::new(table, Vec::new()).with_ids(Arc::new(SequentialIds::starting_at(101)))
}

/// Encode `frame`, decode it back from the wire and hand it to the engine.
pub fn send(engine: &mut StreamEngine<Vec<Bytes>>, frame: Frame) {
    let mut write = WriteBuffer::new();
    let mut read = FrameBuffer::new();
    let bytes = write.encode(&frame).unwrap().to_vec();
    for decoded in read.push(&bytes).unwrap() {
        engine.on_frame(decoded);
    }
}

/// Frames the engine wrote since the last call.
pub fn take(engine: &mut StreamEngine<Vec<Bytes>>) -> Vec<Frame> {
    let mut buffer = FrameBuffer::new();
    engine
        .sink_mut()
        .drain(..)
        .flat_map(|bytes| buffer.push(&bytes).unwrap())
        .collect()
}

pub fn kinds(frames: &[Frame]) -> Vec<(FrameKind, u64)> {
    frames
        .iter()
        .map(|f| (f.kind(), f.header().stream_id))
        .collect()
}

pub fn up(stream_id: u64) -> StreamHeader {
    StreamHeader::new(0, ROUTED, stream_id)
}

pub fn down(stream_id: u64) -> StreamHeader {
    StreamHeader::new(ROUTED, EXIT, stream_id)
}

pub fn request(headers: &[(&str, &str)]) -> Extension {
    let request = RequestBeginEx {
        headers: headers
            .iter()
            .map(|(name, value)| HeaderEntry::new(*name, *value))
            .collect(),
    };
    Extension::encode(REQUEST_TYPE_ID, &request).unwrap()
}
