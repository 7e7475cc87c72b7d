//! Tunnel bridge driven through the engine with encoded frames.

mod common;

use bytes::Bytes;
use common::*;
use wirebridge::protocol::{
    flags, BeginFrame, DataFrame, Frame, FrameKind, SignalFrame, StreamHeader, WindowFrame,
};
use wirebridge::BindingConfig;

const TUNNEL: &str = r#"{ "id": 1, "routes": [{ "exit": 2 }] }"#;

fn begin(stream_id: u64) -> Frame {
    Frame::Begin(BeginFrame::new(up(stream_id)))
}

fn window(header: StreamHeader) -> Frame {
    Frame::Window(WindowFrame::new(header))
}

fn data(header: StreamHeader, payload: &'static [u8], reserved: u32) -> Frame {
    Frame::Data(DataFrame::new(header, flags::COMPLETE, Bytes::from_static(payload)).reserved(reserved))
}

#[test]
fn test_graceful_round_trip() {
    let mut engine = engine(&[TUNNEL]);

    send(
        &mut engine,
        Frame::Begin(
            BeginFrame::new(up(5).authorization(7))
                .affinity(3)
                .extension(request(&[(":path", "/items")])),
        ),
    );
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Begin, 101)]);
    match &out[0] {
        Frame::Begin(begin) => {
            assert_eq!(begin.header.routed_id, EXIT);
            assert_eq!(begin.header.origin_id, ROUTED);
            assert_eq!(begin.header.authorization, 7);
            assert_eq!(begin.affinity, 3);
            assert_eq!(begin.extension, request(&[(":path", "/items")]));
        }
        other => panic!("unexpected {:?}", other),
    }

    send(&mut engine, window(down(101).window(0, 0, 64)));
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Window, 5)]);
    assert_eq!(out[0].header().maximum, 64);

    send(&mut engine, data(up(5), b"hello", 5));
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Data, 101)]);
    match &out[0] {
        Frame::Data(data) => {
            assert_eq!(data.header.sequence, 0);
            assert_eq!(data.reserved, 5);
            assert_eq!(&data.payload[..], b"hello");
        }
        other => panic!("unexpected {:?}", other),
    }

    // END waits for the downstream to acknowledge everything in flight.
    send(&mut engine, Frame::End(SignalFrame::new(up(5).window(5, 0, 64))));
    assert!(take(&mut engine).is_empty());
    send(&mut engine, window(down(101).window(5, 5, 64)));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::End, 101)]);

    send(&mut engine, Frame::Begin(BeginFrame::new(down(100))));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::Begin, 4)]);

    send(&mut engine, window(up(4).window(0, 0, 64)));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::Window, 100)]);

    send(&mut engine, data(down(100), b"world", 5));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::Data, 4)]);

    send(&mut engine, Frame::End(SignalFrame::new(down(100).window(5, 0, 64))));
    assert!(take(&mut engine).is_empty());
    send(&mut engine, window(up(4).window(5, 5, 64)));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::End, 4)]);

    let stats = engine.stats();
    assert_eq!(stats.open_proxies, 0);
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.rejected_streams, 0);
}

#[test]
fn test_backpressure_translates_padding() {
    let mut engine = engine(&[r#"{ "id": 1, "routes": [{ "exit": 2, "padding": 2 }] }"#]);

    send(&mut engine, begin(5));
    take(&mut engine);

    send(
        &mut engine,
        Frame::Window(WindowFrame::new(down(101).window(0, 0, 10)).padding(4)),
    );
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Window, 5)]);
    match &out[0] {
        Frame::Window(window) => {
            assert_eq!(window.header.maximum, 10);
            assert_eq!(window.padding, 6);
        }
        other => panic!("unexpected {:?}", other),
    }

    send(&mut engine, data(up(5), b"ab", 8));
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Data, 101)]);

    // 8 + 8 exceeds the 10 bytes granted.
    send(&mut engine, data(up(5).window(8, 0, 10), b"cd", 8));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![
            (FrameKind::Reset, 5),
            (FrameKind::Abort, 4),
            (FrameKind::Abort, 101),
            (FrameKind::Reset, 100),
        ]
    );
    assert_eq!(engine.stats().open_proxies, 0);
}

#[test]
fn test_underreserved_data_resets() {
    let mut engine = engine(&[r#"{ "id": 1, "routes": [{ "exit": 2, "padding": 2 }] }"#]);

    send(&mut engine, begin(5));
    send(
        &mut engine,
        Frame::Window(WindowFrame::new(down(101).window(0, 0, 64)).padding(4)),
    );
    take(&mut engine);

    send(&mut engine, data(up(5), b"ab", 2));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![
            (FrameKind::Reset, 5),
            (FrameKind::Abort, 4),
            (FrameKind::Abort, 101),
            (FrameKind::Reset, 100),
        ]
    );
}

#[test]
fn test_sequence_overflow_resets_instead_of_wrapping() {
    let mut engine = engine(&[TUNNEL]);

    send(&mut engine, begin(5));
    send(&mut engine, window(down(101).window(0, 0, 64)));
    take(&mut engine);

    send(&mut engine, data(up(5).window(u64::MAX - 1, 0, 64), b"abc", 3));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![
            (FrameKind::Reset, 5),
            (FrameKind::Abort, 4),
            (FrameKind::Abort, 101),
            (FrameKind::Reset, 100),
        ]
    );
    assert_eq!(engine.stats().open_proxies, 0);
}

#[test]
fn test_invalid_begin_positions_reset() {
    let mut engine = engine(&[TUNNEL]);

    send(&mut engine, Frame::Begin(BeginFrame::new(up(5).window(0, 10, 0))));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![(FrameKind::Reset, 5), (FrameKind::Abort, 4)]
    );
    let stats = engine.stats();
    assert_eq!(stats.open_proxies, 0);
    assert_eq!(stats.reclaimed, 1);
}

#[test]
fn test_cascade_emits_each_terminal_once() {
    let mut engine = engine(&[TUNNEL]);

    send(&mut engine, begin(5));
    send(&mut engine, Frame::Begin(BeginFrame::new(down(100))));
    take(&mut engine);

    send(&mut engine, Frame::Abort(SignalFrame::new(down(100))));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![
            (FrameKind::Reset, 5),
            (FrameKind::Abort, 4),
            (FrameKind::Abort, 101),
        ]
    );

    // Everything is closed; late terminals address no stream.
    send(&mut engine, Frame::Reset(SignalFrame::new(down(101))));
    send(&mut engine, Frame::Abort(SignalFrame::new(up(5))));
    send(&mut engine, Frame::Reset(SignalFrame::new(up(4))));
    assert!(take(&mut engine).is_empty());

    let stats = engine.stats();
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.frames_in, 6);
}

#[test]
fn test_duplicate_end_is_idempotent() {
    let mut engine = engine(&[TUNNEL]);

    send(&mut engine, begin(5));
    send(&mut engine, window(down(101).window(0, 0, 64)));
    take(&mut engine);

    send(&mut engine, Frame::End(SignalFrame::new(up(5))));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::End, 101)]);

    send(&mut engine, Frame::End(SignalFrame::new(up(5))));
    assert!(take(&mut engine).is_empty());
    assert_eq!(engine.stats().open_proxies, 1);
}

#[test]
fn test_unresolved_stream_rejected() {
    let mut engine = engine(&[TUNNEL]);

    send(&mut engine, Frame::Begin(BeginFrame::new(StreamHeader::new(0, 9, 5))));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![(FrameKind::Reset, 5), (FrameKind::Abort, 4)]
    );
    assert_eq!(engine.stats().rejected_streams, 1);
}

#[test]
fn test_guarded_route_checks_authorization() {
    let mut engine = engine(&[r#"{ "id": 1, "routes": [{ "exit": 2, "guarded": 42 }] }"#]);

    send(&mut engine, begin(5));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![(FrameKind::Reset, 5), (FrameKind::Abort, 4)]
    );

    send(&mut engine, Frame::Begin(BeginFrame::new(up(7).authorization(42))));
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Begin, 101)]);
    assert_eq!(out[0].header().authorization, 42);
}

#[test]
fn test_attach_at_runtime() {
    let mut engine = engine(&[]);

    send(&mut engine, begin(5));
    assert_eq!(engine.stats().rejected_streams, 1);
    take(&mut engine);

    engine
        .attach(BindingConfig::from_json(TUNNEL).unwrap())
        .unwrap();
    send(&mut engine, begin(7));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::Begin, 101)]);
    assert_eq!(engine.stats().open_proxies, 1);
}
