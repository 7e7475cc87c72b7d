//! Correlated bridge driven through the engine with encoded frames.

mod common;

use bytes::Bytes;
use common::*;
use wirebridge::binding::{EventsBeginEx, EventsDataEx, HeaderEntry, RequestBeginEx, EVENTS_TYPE_ID};
use wirebridge::codec::Extension;
use wirebridge::protocol::{
    flags, BeginFrame, DataFrame, Frame, FrameKind, SignalFrame, StreamHeader, WindowFrame,
};

const CORRELATED: &str = r#"{
    "id": 1,
    "routes": [
        {
            "exit": 2,
            "when": [{ "headers": { ":method": "POST" } }],
            "with": {
                "kind": "correlated",
                "topic": "requests",
                "key": "x-key",
                "reply_to": ["responses"],
                "correlation": { "header": "correlation-id", "prefix": "corr" }
            }
        },
        { "exit": 2 }
    ]
}"#;

fn window(header: StreamHeader) -> Frame {
    Frame::Window(WindowFrame::new(header))
}

fn post(stream_id: u64) -> Frame {
    Frame::Begin(BeginFrame::new(up(stream_id)).extension(request(&[
        (":method", "POST"),
        ("x-key", "k1"),
        ("content-length", "5"),
    ])))
}

fn begin_ex(frame: &Frame) -> EventsBeginEx {
    frame.extension().unwrap().decode().unwrap()
}

fn data_ex(frame: &Frame) -> EventsDataEx {
    frame.extension().unwrap().decode().unwrap()
}

/// Open a request, send its body and end it, leaving one correlate open.
fn produce_request(engine: &mut wirebridge::StreamEngine<Vec<Bytes>>) -> String {
    send(engine, post(5));
    let out = take(engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Begin, 101)]);
    assert_eq!(
        begin_ex(&out[0]),
        EventsBeginEx::Produce {
            topic: "requests".to_string()
        }
    );

    send(engine, window(down(101).window(0, 0, 64)));
    let out = take(engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Window, 5), (FrameKind::Data, 101)]);

    send(
        engine,
        Frame::Data(
            DataFrame::new(up(5), flags::COMPLETE, Bytes::from_static(b"hello")).reserved(5),
        ),
    );
    assert_eq!(kinds(&take(engine)), vec![(FrameKind::Data, 101)]);

    send(engine, Frame::End(SignalFrame::new(up(5).window(5, 0, 64))));
    let out = take(engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Data, 101), (FrameKind::Begin, 103)]);

    let token = match data_ex(&out[0]) {
        EventsDataEx::Produce { headers, .. } => headers[0].value.clone(),
        other => panic!("unexpected {:?}", other),
    };
    assert!(token.starts_with("corr-"));
    assert_eq!(
        begin_ex(&out[1]),
        EventsBeginEx::Correlate {
            topic: "responses".to_string(),
            filters: vec![HeaderEntry::new("correlation-id", token.clone())],
        }
    );
    token
}

#[test]
fn test_request_reply_through_engine() {
    let mut engine = engine(&[CORRELATED]);
    let token = produce_request(&mut engine);

    send(&mut engine, window(up(4).window(0, 0, 64)));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::Window, 102)]);

    send(&mut engine, window(down(101).window(5, 5, 64)));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::End, 101)]);

    send(&mut engine, Frame::Begin(BeginFrame::new(down(102))));
    let fetch = EventsDataEx::Fetch {
        deferred: 0,
        headers: vec![
            HeaderEntry::new("correlation-id", token),
            HeaderEntry::new("content-type", "text/plain"),
        ],
    };
    send(
        &mut engine,
        Frame::Data(
            DataFrame::new(down(102), flags::COMPLETE, Bytes::from_static(b"world"))
                .reserved(5)
                .extension(Extension::encode(EVENTS_TYPE_ID, &fetch).unwrap()),
        ),
    );
    let out = take(&mut engine);
    assert_eq!(
        kinds(&out),
        vec![
            (FrameKind::Begin, 4),
            (FrameKind::Data, 4),
            (FrameKind::End, 103),
        ]
    );
    let response: RequestBeginEx = out[0].extension().unwrap().decode().unwrap();
    assert_eq!(response.header("content-length"), Some("5"));
    assert_eq!(response.header("correlation-id"), None);
    match &out[1] {
        Frame::Data(data) => assert_eq!(&data.payload[..], b"world"),
        other => panic!("unexpected {:?}", other),
    }

    send(&mut engine, window(up(4).window(5, 5, 64)));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![(FrameKind::Window, 102), (FrameKind::End, 4)]
    );

    send(&mut engine, Frame::End(SignalFrame::new(down(102))));
    send(&mut engine, Frame::Begin(BeginFrame::new(down(100))));
    send(&mut engine, Frame::End(SignalFrame::new(down(100))));
    assert!(take(&mut engine).is_empty());

    let stats = engine.stats();
    assert_eq!(stats.open_proxies, 0);
    assert_eq!(stats.reclaimed, 1);
}

#[test]
fn test_unmatched_request_falls_back_to_tunnel() {
    let mut engine = engine(&[CORRELATED]);

    let get = request(&[(":method", "GET")]);
    send(
        &mut engine,
        Frame::Begin(BeginFrame::new(up(5)).extension(get.clone())),
    );
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Begin, 101)]);
    assert_eq!(out[0].extension(), Some(&get));
}

#[test]
fn test_correlate_reset_fails_request() {
    let mut engine = engine(&[CORRELATED]);
    produce_request(&mut engine);

    send(&mut engine, Frame::Reset(SignalFrame::new(down(103))));
    assert_eq!(
        kinds(&take(&mut engine)),
        vec![
            (FrameKind::Abort, 4),
            (FrameKind::Abort, 101),
            (FrameKind::Reset, 100),
            (FrameKind::Reset, 102),
        ]
    );
    assert_eq!(engine.stats().open_proxies, 0);
}

#[test]
fn test_produce_route_acknowledges_without_reply() {
    let mut engine = engine(&[r#"{ "id": 1, "routes": [{ "exit": 2,
        "with": { "kind": "produce", "topic": "events" } }] }"#]);

    send(&mut engine, Frame::Begin(BeginFrame::new(up(5))));
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Begin, 101)]);
    assert_eq!(
        begin_ex(&out[0]),
        EventsBeginEx::Produce {
            topic: "events".to_string()
        }
    );

    send(&mut engine, window(down(101).window(0, 0, 64)));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::Window, 5), (FrameKind::Data, 101)]);

    send(&mut engine, Frame::End(SignalFrame::new(up(5))));
    assert_eq!(kinds(&take(&mut engine)), vec![(FrameKind::Data, 101), (FrameKind::End, 101)]);

    send(&mut engine, Frame::Begin(BeginFrame::new(down(100))));
    send(&mut engine, Frame::End(SignalFrame::new(down(100))));
    let out = take(&mut engine);
    assert_eq!(kinds(&out), vec![(FrameKind::Begin, 4), (FrameKind::End, 4)]);
    let response: RequestBeginEx = out[0].extension().unwrap().decode().unwrap();
    assert_eq!(response.header(":status"), Some("204"));

    let stats = engine.stats();
    assert_eq!(stats.open_proxies, 0);
    assert_eq!(stats.reclaimed, 1);
}
