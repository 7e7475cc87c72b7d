//! Stream pair: ids, half states and windows of one bidirectional stream.
//!
//! The `on_*` methods account for frames received on a half; the `do_*`
//! methods emit frames on a half. Which side of each half the owner is on
//! follows from how it uses the pair: a proxy receives the upstream
//! initial half and sends the upstream reply half, and the reverse for
//! each downstream pair.

use bytes::Bytes;

use super::ProxyContext;
use crate::codec::Extension;
use crate::flow::{FlowError, Half, PairState, Window};
use crate::protocol::{
    BeginFrame, DataFrame, FlushFrame, Frame, SignalFrame, StreamHeader, WindowFrame,
};

/// One bidirectional stream.
#[derive(Debug, Clone)]
pub struct StreamPair {
    pub origin_id: u64,
    pub routed_id: u64,
    pub initial_id: u64,
    pub reply_id: u64,
    pub authorization: u64,
    pub affinity: u64,
    pub state: PairState,
    pub initial: Window,
    pub reply: Window,
}

impl StreamPair {
    pub fn new(origin_id: u64, routed_id: u64, initial_id: u64, reply_id: u64) -> Self {
        Self {
            origin_id,
            routed_id,
            initial_id,
            reply_id,
            authorization: 0,
            affinity: 0,
            state: PairState::default(),
            initial: Window::default(),
            reply: Window::default(),
        }
    }

    pub fn authorization(mut self, authorization: u64) -> Self {
        self.authorization = authorization;
        self
    }

    #[inline]
    pub fn id(&self, half: Half) -> u64 {
        match half {
            Half::Initial => self.initial_id,
            Half::Reply => self.reply_id,
        }
    }

    #[inline]
    pub fn window(&self, half: Half) -> &Window {
        match half {
            Half::Initial => &self.initial,
            Half::Reply => &self.reply,
        }
    }

    #[inline]
    pub fn window_mut(&mut self, half: Half) -> &mut Window {
        match half {
            Half::Initial => &mut self.initial,
            Half::Reply => &mut self.reply,
        }
    }

    /// Header addressing `half` with its current window.
    pub fn header(&self, half: Half, trace_id: u64) -> StreamHeader {
        let window = self.window(half);
        StreamHeader::new(self.origin_id, self.routed_id, self.id(half))
            .window(window.sequence, window.acknowledge, window.maximum)
            .trace(trace_id)
            .authorization(self.authorization)
    }

    /// Advance `half` to the positions of another window so that forwarded
    /// fragments keep both sequence spaces aligned. Positions never move back.
    pub fn inherit(&mut self, half: Half, from: &Window) {
        let window = self.window_mut(half);
        window.sequence = window.sequence.max(from.sequence);
        window.acknowledge = window.acknowledge.max(from.acknowledge);
    }

    /// Both halves closed, or never opened at all.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state.is_closed() || !self.state.is_started()
    }

    /// Accept a BEGIN received on `half`.
    ///
    /// Returns `Ok(false)` for a duplicate BEGIN, which leaves the pair as is.
    pub fn on_begin(&mut self, half: Half, begin: &BeginFrame) -> Result<bool, FlowError> {
        if !self.state.get(half).is_unopened() {
            return Ok(false);
        }
        self.window_mut(half)
            .on_begin(begin.header.sequence, begin.header.acknowledge)?;
        if half == Half::Initial {
            self.authorization = begin.header.authorization;
            self.affinity = begin.affinity;
        }
        Ok(self.state.get_mut(half).accept())
    }

    /// Account for DATA received on `half`.
    pub fn on_data(&mut self, half: Half, data: &DataFrame) -> Result<(), FlowError> {
        self.window_mut(half)
            .on_data(data.header.sequence, data.reserved, data.payload.len())
    }

    /// Account for FLUSH received on `half`.
    pub fn on_flush(&mut self, half: Half, flush: &FlushFrame) -> Result<(), FlowError> {
        self.window_mut(half)
            .on_data(flush.header.sequence, flush.reserved, 0)
    }

    /// Apply a WINDOW received for `half`, which we send on.
    pub fn on_window(&mut self, half: Half, window: &WindowFrame) -> Result<(), FlowError> {
        self.window_mut(half).on_credit(
            window.header.acknowledge,
            window.header.maximum,
            window.budget_id,
            window.padding,
        )?;
        self.window_mut(half).capabilities = window.capabilities;
        self.state.get_mut(half).window();
        Ok(())
    }

    /// Close `half` after END, ABORT or RESET from the peer.
    #[inline]
    pub fn on_closed(&mut self, half: Half) -> bool {
        self.state.get_mut(half).close()
    }

    /// Emit BEGIN on `half`.
    pub fn do_begin(&mut self, half: Half, cx: &mut ProxyContext<'_>, extension: Extension) -> bool {
        if !self.state.get_mut(half).begin() {
            return false;
        }
        cx.write(&Frame::Begin(
            BeginFrame::new(self.header(half, cx.trace_id()))
                .affinity(self.affinity)
                .extension(extension),
        ));
        true
    }

    /// Emit DATA on `half`, consuming `reserved` credit.
    #[allow(clippy::too_many_arguments)]
    pub fn do_data(
        &mut self,
        half: Half,
        cx: &mut ProxyContext<'_>,
        flags: u8,
        budget_id: u64,
        reserved: u32,
        payload: Bytes,
        extension: Extension,
    ) -> Result<(), FlowError> {
        if !self.state.get(half).is_active() {
            return Ok(());
        }
        let header = self.header(half, cx.trace_id());
        self.window_mut(half).acquire(reserved, payload.len())?;
        cx.write(&Frame::Data(
            DataFrame::new(header, flags, payload)
                .budget_id(budget_id)
                .reserved(reserved)
                .extension(extension),
        ));
        Ok(())
    }

    /// Emit FLUSH on `half`.
    pub fn do_flush(
        &mut self,
        half: Half,
        cx: &mut ProxyContext<'_>,
        budget_id: u64,
        reserved: u32,
        extension: Extension,
    ) -> Result<(), FlowError> {
        if !self.state.get(half).is_active() {
            return Ok(());
        }
        let header = self.header(half, cx.trace_id());
        self.window_mut(half).acquire(reserved, 0)?;
        cx.write(&Frame::Flush(FlushFrame {
            header,
            budget_id,
            reserved,
            extension,
        }));
        Ok(())
    }

    /// Request END on `half`. It is written once in-flight bytes drain.
    pub fn do_end(&mut self, half: Half, cx: &mut ProxyContext<'_>) -> bool {
        if !self.state.get_mut(half).closing() {
            return false;
        }
        self.flush_end(half, cx);
        true
    }

    /// Write a deferred END if `half` is closing and drained.
    pub fn flush_end(&mut self, half: Half, cx: &mut ProxyContext<'_>) -> bool {
        if !self.state.get(half).is_closing() || !self.window(half).is_drained() {
            return false;
        }
        self.state.get_mut(half).close();
        cx.write(&Frame::End(SignalFrame::new(self.header(half, cx.trace_id()))));
        true
    }

    /// Emit ABORT on `half` unless already closed.
    pub fn do_abort(&mut self, half: Half, cx: &mut ProxyContext<'_>) -> bool {
        if !self.state.get_mut(half).close() {
            return false;
        }
        cx.write(&Frame::Abort(SignalFrame::new(self.header(half, cx.trace_id()))));
        true
    }

    /// Emit RESET on `half` unless already closed.
    pub fn do_reset(&mut self, half: Half, cx: &mut ProxyContext<'_>) -> bool {
        if !self.state.get_mut(half).close() {
            return false;
        }
        cx.write(&Frame::Reset(SignalFrame::new(self.header(half, cx.trace_id()))));
        true
    }

    /// Grant credit on `half`, which we receive on.
    ///
    /// The WINDOW is written once the pair has started and while the half
    /// is not closed; the credit is recorded either way.
    #[allow(clippy::too_many_arguments)]
    pub fn do_window(
        &mut self,
        half: Half,
        cx: &mut ProxyContext<'_>,
        acknowledge: u64,
        maximum: u32,
        budget_id: u64,
        padding: u32,
        capabilities: u8,
    ) -> Result<(), FlowError> {
        self.window_mut(half)
            .on_credit(acknowledge, maximum, budget_id, padding)?;
        self.window_mut(half).capabilities = capabilities;

        if self.state.is_started() && !self.state.get(half).is_closed() {
            cx.write(&Frame::Window(
                WindowFrame::new(self.header(half, cx.trace_id()))
                    .budget_id(budget_id)
                    .padding(padding)
                    .capabilities(capabilities),
            ));
        }
        Ok(())
    }

    /// Emit CHALLENGE on `half`, against its data direction.
    pub fn do_challenge(&mut self, half: Half, cx: &mut ProxyContext<'_>, extension: Extension) {
        if self.state.get(half).is_active() {
            cx.write(&Frame::Challenge(
                SignalFrame::new(self.header(half, cx.trace_id())).extension(extension),
            ));
        }
    }

    /// Abnormal close of the whole pair: ABORT on `outbound`, RESET on the
    /// opposite half. Pairs never started are closed silently.
    pub fn abort_pair(&mut self, outbound: Half, cx: &mut ProxyContext<'_>) {
        if !self.state.is_started() {
            self.state.initial.close();
            self.state.reply.close();
            return;
        }
        self.do_abort(outbound, cx);
        self.do_reset(outbound.opposite(), cx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::SequentialIds;
    use crate::protocol::{flags, FrameBuffer, FrameKind, WriteBuffer};

    fn decode(sink: &[Bytes]) -> Vec<Frame> {
        let mut buffer = FrameBuffer::new();
        sink.iter()
            .flat_map(|bytes| buffer.push(bytes).unwrap())
            .collect()
    }

    #[test]
    fn test_emitters_are_guarded() {
        let mut buffer = WriteBuffer::new();
        let mut sink: Vec<Bytes> = Vec::new();
        let ids = SequentialIds::new();
        let mut cx = ProxyContext::new(&mut buffer, &mut sink, &ids, 0);

        let mut pair = StreamPair::new(0, 2, 3, 2);
        assert!(pair.do_begin(Half::Initial, &mut cx, Extension::empty()));
        assert!(!pair.do_begin(Half::Initial, &mut cx, Extension::empty()));
        assert!(pair.do_abort(Half::Initial, &mut cx));
        assert!(!pair.do_abort(Half::Initial, &mut cx));
        assert!(!pair.do_end(Half::Initial, &mut cx));
        drop(cx);

        let kinds: Vec<_> = decode(&sink).iter().map(Frame::kind).collect();
        assert_eq!(kinds, vec![FrameKind::Begin, FrameKind::Abort]);
    }

    #[test]
    fn test_end_deferred_until_drained() {
        let mut buffer = WriteBuffer::new();
        let mut sink: Vec<Bytes> = Vec::new();
        let ids = SequentialIds::new();
        let mut cx = ProxyContext::new(&mut buffer, &mut sink, &ids, 0);

        let mut pair = StreamPair::new(0, 2, 3, 2);
        pair.do_begin(Half::Initial, &mut cx, Extension::empty());
        pair.on_window(
            Half::Initial,
            &WindowFrame::new(StreamHeader::new(0, 2, 3).window(0, 0, 100)),
        )
        .unwrap();
        assert!(pair.state.initial.is_open());

        pair.do_data(
            Half::Initial,
            &mut cx,
            flags::COMPLETE,
            0,
            5,
            Bytes::from_static(b"hello"),
            Extension::empty(),
        )
        .unwrap();

        assert!(pair.do_end(Half::Initial, &mut cx));
        assert!(pair.state.initial.is_closing());
        assert_eq!(cx.written(), 2);

        pair.on_window(
            Half::Initial,
            &WindowFrame::new(StreamHeader::new(0, 2, 3).window(5, 5, 100)),
        )
        .unwrap();
        assert!(pair.flush_end(Half::Initial, &mut cx));
        assert!(pair.state.initial.is_closed());
        assert!(!pair.flush_end(Half::Initial, &mut cx));
        drop(cx);

        let frames = decode(&sink);
        assert_eq!(frames.last().unwrap().kind(), FrameKind::End);
        assert_eq!(frames.last().unwrap().header().sequence, 5);
    }

    #[test]
    fn test_data_overrun_not_written() {
        let mut buffer = WriteBuffer::new();
        let mut sink: Vec<Bytes> = Vec::new();
        let ids = SequentialIds::new();
        let mut cx = ProxyContext::new(&mut buffer, &mut sink, &ids, 0);

        let mut pair = StreamPair::new(0, 2, 3, 2);
        pair.do_begin(Half::Initial, &mut cx, Extension::empty());

        let err = pair
            .do_data(
                Half::Initial,
                &mut cx,
                flags::COMPLETE,
                0,
                3,
                Bytes::from_static(b"abc"),
                Extension::empty(),
            )
            .unwrap_err();
        assert!(matches!(err, FlowError::Overrun { .. }));
        assert_eq!(cx.written(), 1);
    }

    #[test]
    fn test_abort_pair_on_unstarted_is_silent() {
        let mut buffer = WriteBuffer::new();
        let mut sink: Vec<Bytes> = Vec::new();
        let ids = SequentialIds::new();
        let mut cx = ProxyContext::new(&mut buffer, &mut sink, &ids, 0);

        let mut pair = StreamPair::new(0, 2, 3, 2);
        pair.abort_pair(Half::Initial, &mut cx);
        assert!(pair.state.is_closed());
        assert_eq!(cx.written(), 0);
    }

    #[test]
    fn test_window_before_reply_begin() {
        let mut buffer = WriteBuffer::new();
        let mut sink: Vec<Bytes> = Vec::new();
        let ids = SequentialIds::new();
        let mut cx = ProxyContext::new(&mut buffer, &mut sink, &ids, 0);

        let mut pair = StreamPair::new(0, 2, 3, 2);
        pair.do_window(Half::Reply, &mut cx, 0, 64, 0, 0, 0).unwrap();
        assert_eq!(cx.written(), 0);

        pair.do_begin(Half::Initial, &mut cx, Extension::empty());
        pair.do_window(Half::Reply, &mut cx, 0, 128, 0, 2, 0).unwrap();
        assert_eq!(cx.written(), 2);
        drop(cx);

        match &decode(&sink)[1] {
            Frame::Window(window) => {
                assert_eq!(window.header.stream_id, 2);
                assert_eq!(window.header.maximum, 128);
                assert_eq!(window.padding, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_begin_with_ack_beyond_sequence_rejected() {
        let mut pair = StreamPair::new(0, 1, 5, 4);
        let begin = BeginFrame::new(StreamHeader::new(0, 1, 5).window(0, 10, 0));

        assert!(matches!(
            pair.on_begin(Half::Initial, &begin),
            Err(FlowError::AckBeyondSequence { acknowledge: 10, sequence: 0 })
        ));
        assert!(pair.state.initial.is_unopened());
        assert_eq!(pair.initial, Window::default());

        let begin = BeginFrame::new(StreamHeader::new(0, 1, 5).window(10, 4, 0)).affinity(3);
        assert_eq!(pair.on_begin(Half::Initial, &begin), Ok(true));
        assert_eq!((pair.initial.sequence, pair.initial.acknowledge), (10, 4));
        assert_eq!(pair.affinity, 3);
        assert_eq!(pair.on_begin(Half::Initial, &begin), Ok(false));
    }
}
