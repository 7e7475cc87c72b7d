//! Pass-through bridge: one upstream pair mapped onto one downstream pair.
//!
//! Payload and credit positions are forwarded unchanged, so the upstream and
//! downstream sequence spaces stay aligned in both directions. Credit granted
//! upstream carries the route padding on top of the downstream padding.

use tracing::{debug, warn};

use super::{Leg, Proxy};
use crate::flow::{add_padding, FlowError, Half};
use crate::protocol::{BeginFrame, Frame, WindowFrame};
use crate::stream::{ProxyContext, StreamPair};

pub struct TunnelProxy {
    upstream: StreamPair,
    /// Opened on upstream BEGIN.
    downstream: Option<StreamPair>,
    exit: u64,
    padding: u32,
}

impl TunnelProxy {
    pub fn new(upstream: StreamPair, exit: u64, padding: u32) -> Self {
        Self {
            upstream,
            downstream: None,
            exit,
            padding,
        }
    }

    fn on_upstream_begin(&mut self, begin: BeginFrame, cx: &mut ProxyContext<'_>) -> Result<(), FlowError> {
        if !self.upstream.on_begin(Half::Initial, &begin)? {
            debug!(stream = self.upstream.initial_id, "duplicate BEGIN ignored");
            return Ok(());
        }

        let (initial_id, reply_id) = cx.supply_ids(self.exit);
        let mut downstream = StreamPair::new(self.upstream.routed_id, self.exit, initial_id, reply_id)
            .authorization(self.upstream.authorization);
        downstream.affinity = self.upstream.affinity;
        downstream.inherit(Half::Initial, &self.upstream.initial);
        cx.register(self.exit, initial_id, reply_id, Leg::Downstream(0));

        downstream.do_begin(Half::Initial, cx, begin.extension);
        debug!(
            stream = self.upstream.initial_id,
            downstream = initial_id,
            exit = self.exit,
            "tunnel opened"
        );
        self.downstream = Some(downstream);
        Ok(())
    }

    fn on_upstream_initial(&mut self, frame: Frame, cx: &mut ProxyContext<'_>) -> Result<(), FlowError> {
        match frame {
            Frame::Begin(begin) => self.on_upstream_begin(begin, cx)?,
            Frame::Data(data) => {
                self.upstream.on_data(Half::Initial, &data)?;
                if let Some(downstream) = self.downstream.as_mut() {
                    downstream.do_data(
                        Half::Initial,
                        cx,
                        data.flags,
                        data.budget_id,
                        data.reserved,
                        data.payload,
                        data.extension,
                    )?;
                }
            }
            Frame::Flush(flush) => {
                self.upstream.on_flush(Half::Initial, &flush)?;
                if let Some(downstream) = self.downstream.as_mut() {
                    downstream.do_flush(
                        Half::Initial,
                        cx,
                        flush.budget_id,
                        flush.reserved,
                        flush.extension,
                    )?;
                }
            }
            Frame::End(_) => {
                self.upstream.on_closed(Half::Initial);
                if let Some(downstream) = self.downstream.as_mut() {
                    downstream.do_end(Half::Initial, cx);
                }
            }
            Frame::Abort(_) => {
                self.upstream.on_closed(Half::Initial);
                self.cleanup(cx);
            }
            other => unexpected(Leg::Upstream, &other),
        }
        Ok(())
    }

    fn on_upstream_reply(&mut self, frame: Frame, cx: &mut ProxyContext<'_>) -> Result<(), FlowError> {
        match frame {
            Frame::Window(window) => {
                self.upstream.on_window(Half::Reply, &window)?;
                let credit = self.upstream.reply;
                if let Some(downstream) = self.downstream.as_mut() {
                    downstream.do_window(
                        Half::Reply,
                        cx,
                        credit.acknowledge,
                        credit.maximum,
                        credit.budget_id,
                        credit.padding,
                        credit.capabilities,
                    )?;
                }
                self.upstream.flush_end(Half::Reply, cx);
            }
            Frame::Reset(_) => {
                if self.upstream.state.reply.is_unopened() {
                    debug!(stream = self.upstream.reply_id, "RESET on unopened reply ignored");
                    return Ok(());
                }
                self.upstream.on_closed(Half::Reply);
                self.cleanup(cx);
            }
            Frame::Challenge(challenge) => {
                if let Some(downstream) = self.downstream.as_mut() {
                    downstream.do_challenge(Half::Reply, cx, challenge.extension);
                }
            }
            other => unexpected(Leg::Upstream, &other),
        }
        Ok(())
    }

    fn on_downstream_window(&mut self, window: WindowFrame, cx: &mut ProxyContext<'_>) -> Result<(), FlowError> {
        let Some(downstream) = self.downstream.as_mut() else {
            return Ok(());
        };
        downstream.on_window(Half::Initial, &window)?;
        let credit = downstream.initial;
        let padding = add_padding(credit.padding, self.padding)?;
        self.upstream.do_window(
            Half::Initial,
            cx,
            credit.acknowledge,
            credit.maximum,
            credit.budget_id,
            padding,
            credit.capabilities,
        )?;
        downstream.flush_end(Half::Initial, cx);
        Ok(())
    }

    fn on_downstream(&mut self, frame: Frame, cx: &mut ProxyContext<'_>) -> Result<(), FlowError> {
        if let Frame::Window(window) = frame {
            if window.header.is_initial() {
                return self.on_downstream_window(window, cx);
            }
        }

        let Some(downstream) = self.downstream.as_mut() else {
            unexpected(Leg::Downstream(0), &frame);
            return Ok(());
        };

        match (Half::of(frame.header().stream_id), frame) {
            (Half::Initial, Frame::Reset(_)) => {
                downstream.on_closed(Half::Initial);
                self.cleanup(cx);
            }
            (Half::Initial, Frame::Challenge(challenge)) => {
                self.upstream.do_challenge(Half::Initial, cx, challenge.extension);
            }
            (Half::Reply, Frame::Begin(begin)) => {
                if downstream.on_begin(Half::Reply, &begin)? {
                    self.upstream.inherit(Half::Reply, &downstream.reply);
                    self.upstream.do_begin(Half::Reply, cx, begin.extension);
                }
            }
            (Half::Reply, Frame::Data(data)) => {
                downstream.on_data(Half::Reply, &data)?;
                self.upstream.do_data(
                    Half::Reply,
                    cx,
                    data.flags,
                    data.budget_id,
                    data.reserved,
                    data.payload,
                    data.extension,
                )?;
            }
            (Half::Reply, Frame::Flush(flush)) => {
                downstream.on_flush(Half::Reply, &flush)?;
                self.upstream
                    .do_flush(Half::Reply, cx, flush.budget_id, flush.reserved, flush.extension)?;
            }
            (Half::Reply, Frame::End(_)) => {
                downstream.on_closed(Half::Reply);
                self.upstream.do_end(Half::Reply, cx);
            }
            (Half::Reply, Frame::Abort(_)) => {
                downstream.on_closed(Half::Reply);
                self.cleanup(cx);
            }
            (_, other) => unexpected(Leg::Downstream(0), &other),
        }
        Ok(())
    }
}

impl Proxy for TunnelProxy {
    fn on_frame(&mut self, leg: Leg, frame: Frame, cx: &mut ProxyContext<'_>) {
        let result = match (leg, Half::of(frame.header().stream_id)) {
            (Leg::Upstream, Half::Initial) => self.on_upstream_initial(frame, cx),
            (Leg::Upstream, Half::Reply) => self.on_upstream_reply(frame, cx),
            (Leg::Downstream(_), _) => self.on_downstream(frame, cx),
        };

        if let Err(e) = result {
            warn!(stream = self.upstream.initial_id, ?leg, "flow violation: {}", e);
            self.cleanup(cx);
        }
    }

    fn cleanup(&mut self, cx: &mut ProxyContext<'_>) {
        self.upstream.do_reset(Half::Initial, cx);
        self.upstream.do_abort(Half::Reply, cx);
        if let Some(downstream) = self.downstream.as_mut() {
            downstream.abort_pair(Half::Initial, cx);
        }
    }

    fn is_reclaimable(&self) -> bool {
        self.upstream.state.is_closed()
            && self.downstream.as_ref().map_or(true, StreamPair::is_done)
    }
}

fn unexpected(leg: Leg, frame: &Frame) {
    warn!(
        stream = frame.header().stream_id,
        ?leg,
        kind = %frame.kind(),
        "unexpected frame ignored"
    );
}
