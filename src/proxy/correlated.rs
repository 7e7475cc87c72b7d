//! Produce-then-correlate bridge.
//!
//! The request is produced as one message on the configured topic. Its key,
//! headers and payload are folded into a [`CorrelationHash`]; the token goes
//! out in the message trailer. Once the request ends, one correlate stream
//! per reply topic subscribes for a message carrying the same token. The
//! first correlate to deliver a reply wins and the others are aborted.
//!
//! Each header name, header value and DATA payload is its own hash chunk.
//! Chunk order does not matter, but chunk boundaries do: the same body
//! split into different fragments yields a different token.
//!
//! A route without reply topics only produces. The upstream reply is a
//! `:status 204` BEGIN and END, sent once the event log ends the produce
//! reply.
//!
//! Legs: `Downstream(0)` is the produce pair, `Downstream(i + 1)` is the
//! correlate pair for `reply_to[i]`.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, warn};

use super::{Leg, Proxy};
use crate::binding::{
    EventsBeginEx, EventsDataEx, HeaderEntry, RequestBeginEx, CONTENT_LENGTH, EVENTS_TYPE_ID,
    REQUEST_TYPE_ID, STATUS,
};
use crate::codec::Extension;
use crate::config::{CorrelatedConfig, CorrelationConfig, ProduceConfig};
use crate::correlation::CorrelationHash;
use crate::error::Result;
use crate::flow::{add_padding, FlowError, Half};
use crate::protocol::{flags, BeginFrame, DataFrame, Frame};
use crate::stream::{ProxyContext, StreamPair};

/// Produce fragment waiting for the produce half to open.
enum Pending {
    Data {
        flags: u8,
        budget_id: u64,
        reserved: u32,
        payload: Bytes,
        extension: Extension,
    },
    Flush {
        budget_id: u64,
        reserved: u32,
    },
}

impl Pending {
    fn reserved(&self) -> u32 {
        match self {
            Pending::Data { reserved, .. } | Pending::Flush { reserved, .. } => *reserved,
        }
    }

    fn len(&self) -> usize {
        match self {
            Pending::Data { payload, .. } => payload.len(),
            Pending::Flush { .. } => 0,
        }
    }
}

pub struct CorrelatedProxy {
    upstream: StreamPair,
    exit: u64,
    padding: u32,
    config: CorrelatedConfig,
    hash: CorrelationHash,
    produce: Option<StreamPair>,
    pending: VecDeque<Pending>,
    /// Request ended; END the produce half once `pending` drains.
    produce_end: bool,
    correlates: Vec<StreamPair>,
    winner: Option<usize>,
}

impl CorrelatedProxy {
    pub fn new(upstream: StreamPair, exit: u64, padding: u32, config: CorrelatedConfig) -> Self {
        let hash = CorrelationHash::new(config.correlation.prefix.clone(), None);
        Self {
            upstream,
            exit,
            padding,
            config,
            hash,
            produce: None,
            pending: VecDeque::new(),
            produce_end: false,
            correlates: Vec::new(),
            winner: None,
        }
    }

    /// Bridge that produces the request and acknowledges it without a reply.
    pub fn produce_only(upstream: StreamPair, exit: u64, padding: u32, config: ProduceConfig) -> Self {
        let config = CorrelatedConfig {
            topic: config.topic,
            key: config.key,
            reply_to: Vec::new(),
            correlation: CorrelationConfig {
                header: String::new(),
                reply_to_header: String::new(),
                prefix: None,
            },
        };
        Self::new(upstream, exit, padding, config)
    }

    #[inline]
    fn awaits_reply(&self) -> bool {
        !self.config.reply_to.is_empty()
    }

    /// Correlation token, once the request has ended.
    pub fn token(&self) -> Option<String> {
        if self.hash.is_finalized() {
            self.hash.token()
        } else {
            None
        }
    }

    fn open_downstream(
        upstream: &StreamPair,
        exit: u64,
        cx: &mut ProxyContext<'_>,
        leg: Leg,
    ) -> StreamPair {
        let (initial_id, reply_id) = cx.supply_ids(exit);
        let mut pair = StreamPair::new(upstream.routed_id, exit, initial_id, reply_id)
            .authorization(upstream.authorization);
        pair.affinity = upstream.affinity;
        cx.register(exit, initial_id, reply_id, leg);
        pair
    }

    fn on_upstream_begin(&mut self, begin: BeginFrame, cx: &mut ProxyContext<'_>) -> Result<()> {
        if !self.upstream.on_begin(Half::Initial, &begin)? {
            debug!(stream = self.upstream.initial_id, "duplicate BEGIN ignored");
            return Ok(());
        }

        let request: RequestBeginEx = begin
            .extension
            .decode_if(REQUEST_TYPE_ID)
            .unwrap_or_default();
        let correlation = self.config.correlation.header.clone();
        let supplied = request.header(&correlation).map(str::to_owned);
        let key = self
            .config
            .key
            .as_deref()
            .and_then(|name| request.header(name))
            .map(str::to_owned);
        let deferred = request
            .header(CONTENT_LENGTH)
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(0);
        let mut headers: Vec<HeaderEntry> = request
            .headers
            .into_iter()
            .filter(|h| !h.name.eq_ignore_ascii_case(&correlation))
            .collect();
        let reply_to_header = &self.config.correlation.reply_to_header;
        headers.extend(
            self.config
                .reply_to
                .iter()
                .map(|topic| HeaderEntry::new(reply_to_header.clone(), topic.clone())),
        );

        let mut hash = CorrelationHash::new(self.config.correlation.prefix.clone(), supplied);
        if let Some(key) = &key {
            hash.update(key.as_bytes())?;
        }
        for header in &headers {
            hash.update(header.name.as_bytes())?;
            hash.update(header.value.as_bytes())?;
        }
        self.hash = hash;

        let begin_ex = Extension::encode(
            EVENTS_TYPE_ID,
            &EventsBeginEx::Produce {
                topic: self.config.topic.clone(),
            },
        )?;
        let metadata = Extension::encode(
            EVENTS_TYPE_ID,
            &EventsDataEx::Produce {
                deferred,
                key,
                headers,
            },
        )?;

        let mut produce =
            Self::open_downstream(&self.upstream, self.exit, cx, Leg::Downstream(0));
        produce.inherit(Half::Initial, &self.upstream.initial);
        produce.do_begin(Half::Initial, cx, begin_ex);
        debug!(
            stream = self.upstream.initial_id,
            produce = produce.initial_id,
            topic = %self.config.topic,
            "produce opened"
        );
        self.produce = Some(produce);

        self.pending.push_back(Pending::Data {
            flags: flags::INIT,
            budget_id: 0,
            reserved: 0,
            payload: Bytes::new(),
            extension: metadata,
        });
        Ok(())
    }

    fn on_upstream_data(&mut self, data: DataFrame, cx: &mut ProxyContext<'_>) -> Result<()> {
        self.upstream.on_data(Half::Initial, &data)?;
        if !data.payload.is_empty() {
            self.hash.update(&data.payload)?;
        }
        self.pending.push_back(Pending::Data {
            flags: data.flags & !(flags::INIT | flags::FIN),
            budget_id: data.budget_id,
            reserved: data.reserved,
            payload: data.payload,
            extension: Extension::empty(),
        });
        self.flush_pending(cx)?;
        Ok(())
    }

    /// Finalize the token, trail the produced message and start listening.
    fn on_request_end(&mut self, cx: &mut ProxyContext<'_>) -> Result<()> {
        if !self.awaits_reply() {
            self.pending.push_back(Pending::Data {
                flags: flags::FIN,
                budget_id: 0,
                reserved: 0,
                payload: Bytes::new(),
                extension: Extension::empty(),
            });
            self.produce_end = true;
            self.flush_pending(cx)?;
            return Ok(());
        }

        self.hash.finalize()?;
        let header = self.config.correlation.header.clone();
        let Some(token) = self.hash.token() else {
            warn!(
                stream = self.upstream.initial_id,
                header = %header,
                "request carries no correlation value"
            );
            self.cleanup(cx);
            return Ok(());
        };

        let trailer = Extension::encode(
            EVENTS_TYPE_ID,
            &EventsDataEx::Produce {
                deferred: 0,
                key: None,
                headers: vec![HeaderEntry::new(header.clone(), token.clone())],
            },
        )?;
        self.pending.push_back(Pending::Data {
            flags: flags::FIN,
            budget_id: 0,
            reserved: 0,
            payload: Bytes::new(),
            extension: trailer,
        });
        self.produce_end = true;
        self.flush_pending(cx)?;

        let filters = vec![HeaderEntry::new(header, token.clone())];
        let credit = self.upstream.reply;
        for (index, topic) in self.config.reply_to.iter().enumerate() {
            let begin_ex = Extension::encode(
                EVENTS_TYPE_ID,
                &EventsBeginEx::Correlate {
                    topic: topic.clone(),
                    filters: filters.clone(),
                },
            )?;
            let mut correlate =
                Self::open_downstream(&self.upstream, self.exit, cx, Leg::Downstream(index + 1));
            correlate.do_begin(Half::Initial, cx, begin_ex);
            let granted = if credit.maximum > 0 {
                correlate.do_window(
                    Half::Reply,
                    cx,
                    credit.acknowledge,
                    credit.maximum,
                    credit.budget_id,
                    credit.padding,
                    credit.capabilities,
                )
            } else {
                Ok(())
            };
            self.correlates.push(correlate);
            granted?;
        }
        debug!(
            stream = self.upstream.initial_id,
            token = %token,
            correlates = self.correlates.len(),
            "awaiting correlated reply"
        );
        Ok(())
    }

    /// Write queued fragments while the produce half has credit for them.
    fn flush_pending(&mut self, cx: &mut ProxyContext<'_>) -> std::result::Result<(), FlowError> {
        let Some(produce) = self.produce.as_mut() else {
            return Ok(());
        };

        while produce.state.initial.is_open() {
            let Some(next) = self.pending.front() else {
                break;
            };
            match produce
                .initial
                .check(produce.initial.sequence, next.reserved(), next.len())
            {
                Err(FlowError::Overrun { .. }) => break,
                Err(e) => return Err(e),
                Ok(()) => {}
            }

            match self.pending.pop_front() {
                Some(Pending::Data {
                    flags,
                    budget_id,
                    reserved,
                    payload,
                    extension,
                }) => {
                    produce.do_data(
                        Half::Initial,
                        cx,
                        flags,
                        budget_id,
                        reserved,
                        payload,
                        extension,
                    )?;
                }
                Some(Pending::Flush {
                    budget_id,
                    reserved,
                }) => {
                    produce.do_flush(Half::Initial, cx, budget_id, reserved, Extension::empty())?;
                }
                None => break,
            }
        }

        if self.produce_end && self.pending.is_empty() {
            produce.do_end(Half::Initial, cx);
        }
        Ok(())
    }

    fn on_upstream_initial(&mut self, frame: Frame, cx: &mut ProxyContext<'_>) -> Result<()> {
        match frame {
            Frame::Begin(begin) => self.on_upstream_begin(begin, cx)?,
            Frame::Data(data) => self.on_upstream_data(data, cx)?,
            Frame::Flush(flush) => {
                self.upstream.on_flush(Half::Initial, &flush)?;
                self.pending.push_back(Pending::Flush {
                    budget_id: flush.budget_id,
                    reserved: flush.reserved,
                });
                self.flush_pending(cx)?;
            }
            Frame::End(_) => {
                if self.upstream.on_closed(Half::Initial) {
                    self.on_request_end(cx)?;
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

    fn on_upstream_reply(&mut self, frame: Frame, cx: &mut ProxyContext<'_>) -> Result<()> {
        match frame {
            Frame::Window(window) => {
                self.upstream.on_window(Half::Reply, &window)?;
                let credit = self.upstream.reply;
                match self.winner {
                    Some(index) => {
                        if let Some(winner) = self.correlates.get_mut(index) {
                            winner.do_window(
                                Half::Reply,
                                cx,
                                credit.acknowledge,
                                credit.maximum,
                                credit.budget_id,
                                credit.padding,
                                credit.capabilities,
                            )?;
                        }
                    }
                    None => {
                        for correlate in self
                            .correlates
                            .iter_mut()
                            .filter(|c| !c.state.reply.is_closed())
                        {
                            if let Err(e) = correlate.do_window(
                                Half::Reply,
                                cx,
                                credit.acknowledge,
                                credit.maximum,
                                credit.budget_id,
                                credit.padding,
                                credit.capabilities,
                            ) {
                                debug!(stream = correlate.reply_id, "credit not mirrored: {}", e);
                            }
                        }
                    }
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
                if let Some(winner) = self.winner.and_then(|i| self.correlates.get_mut(i)) {
                    winner.do_challenge(Half::Reply, cx, challenge.extension);
                }
            }
            other => unexpected(Leg::Upstream, &other),
        }
        Ok(())
    }

    fn on_produce(&mut self, frame: Frame, cx: &mut ProxyContext<'_>) -> Result<()> {
        let Some(produce) = self.produce.as_mut() else {
            unexpected(Leg::Downstream(0), &frame);
            return Ok(());
        };

        match (Half::of(frame.header().stream_id), frame) {
            (Half::Initial, Frame::Window(window)) => {
                produce.on_window(Half::Initial, &window)?;
                let credit = produce.initial;
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
                self.flush_pending(cx)?;
                if let Some(produce) = self.produce.as_mut() {
                    produce.flush_end(Half::Initial, cx);
                }
            }
            (Half::Initial, Frame::Reset(_)) => {
                produce.on_closed(Half::Initial);
                self.cleanup(cx);
            }
            (Half::Initial, Frame::Challenge(challenge)) => {
                self.upstream
                    .do_challenge(Half::Initial, cx, challenge.extension);
            }
            (Half::Reply, Frame::Begin(begin)) => {
                produce.on_begin(Half::Reply, &begin)?;
            }
            (Half::Reply, Frame::End(_)) => {
                produce.on_closed(Half::Reply);
                if !self.awaits_reply() {
                    self.on_produced(cx)?;
                }
            }
            (Half::Reply, Frame::Abort(_)) => {
                produce.on_closed(Half::Reply);
                self.cleanup(cx);
            }
            (_, other) => unexpected(Leg::Downstream(0), &other),
        }
        Ok(())
    }

    /// Answer a produce-only request once the event log has accepted it.
    fn on_produced(&mut self, cx: &mut ProxyContext<'_>) -> Result<()> {
        let begin_ex = Extension::encode(
            REQUEST_TYPE_ID,
            &RequestBeginEx {
                headers: vec![HeaderEntry::new(STATUS, "204")],
            },
        )?;
        if self.upstream.do_begin(Half::Reply, cx, begin_ex) {
            self.upstream.do_end(Half::Reply, cx);
            debug!(stream = self.upstream.reply_id, "produce acknowledged");
        }
        Ok(())
    }

    fn on_correlate(&mut self, index: usize, frame: Frame, cx: &mut ProxyContext<'_>) -> Result<()> {
        let leg = Leg::Downstream(index + 1);
        let Some(correlate) = self.correlates.get_mut(index) else {
            unexpected(leg, &frame);
            return Ok(());
        };

        match (Half::of(frame.header().stream_id), frame) {
            (Half::Initial, Frame::Window(window)) => {
                correlate.on_window(Half::Initial, &window)?;
                correlate.flush_end(Half::Initial, cx);
            }
            (Half::Initial, Frame::Reset(_)) => {
                correlate.on_closed(Half::Initial);
                self.on_correlate_failed(index, cx);
            }
            (Half::Reply, Frame::Begin(begin)) => {
                correlate.on_begin(Half::Reply, &begin)?;
            }
            (Half::Reply, Frame::Data(data)) => self.on_correlate_data(index, data, cx)?,
            (Half::Reply, Frame::Flush(flush)) => {
                if self.winner == Some(index) {
                    correlate.on_flush(Half::Reply, &flush)?;
                    self.upstream.do_flush(
                        Half::Reply,
                        cx,
                        flush.budget_id,
                        flush.reserved,
                        Extension::empty(),
                    )?;
                }
            }
            (Half::Reply, Frame::End(_)) => {
                correlate.on_closed(Half::Reply);
                self.on_correlate_end(index, cx);
            }
            (Half::Reply, Frame::Abort(_)) => {
                correlate.on_closed(Half::Reply);
                self.on_correlate_failed(index, cx);
            }
            (_, other) => unexpected(leg, &other),
        }
        Ok(())
    }

    fn on_correlate_data(&mut self, index: usize, data: DataFrame, cx: &mut ProxyContext<'_>) -> Result<()> {
        match self.winner {
            Some(winner) if winner != index => {
                debug!(stream = data.header.stream_id, "late reply ignored");
                return Ok(());
            }
            None if !data.is_init() => {
                debug!(stream = data.header.stream_id, "reply continuation without start ignored");
                return Ok(());
            }
            None => self.accept_reply(index, &data, cx)?,
            Some(_) => {}
        }

        let Some(correlate) = self.correlates.get_mut(index) else {
            return Ok(());
        };
        let fin = data.is_fin();
        correlate.on_data(Half::Reply, &data)?;
        self.upstream.do_data(
            Half::Reply,
            cx,
            data.flags,
            data.budget_id,
            data.reserved,
            data.payload,
            Extension::empty(),
        )?;
        if fin {
            correlate.do_end(Half::Initial, cx);
            self.upstream.do_end(Half::Reply, cx);
        }
        Ok(())
    }

    /// First reply wins: abort the other correlates and open the upstream reply.
    fn accept_reply(&mut self, index: usize, data: &DataFrame, cx: &mut ProxyContext<'_>) -> Result<()> {
        let (deferred, headers) = match data.extension.decode_if(EVENTS_TYPE_ID) {
            Some(EventsDataEx::Fetch { deferred, headers }) => (deferred, headers),
            _ => (0, Vec::new()),
        };
        let correlation = &self.config.correlation.header;
        let mut headers: Vec<HeaderEntry> = headers
            .into_iter()
            .filter(|h| {
                !h.name.eq_ignore_ascii_case(correlation)
                    && !h.name.eq_ignore_ascii_case(CONTENT_LENGTH)
            })
            .collect();
        let length = data.payload.len() as u64 + deferred as u64;
        headers.push(HeaderEntry::new(CONTENT_LENGTH, length.to_string()));
        let begin_ex = Extension::encode(REQUEST_TYPE_ID, &RequestBeginEx { headers })?;

        self.winner = Some(index);
        for (i, loser) in self.correlates.iter_mut().enumerate() {
            if i != index {
                loser.abort_pair(Half::Initial, cx);
            }
        }

        if let Some(winner) = self.correlates.get(index) {
            self.upstream.inherit(Half::Reply, &winner.reply);
            self.upstream.do_begin(Half::Reply, cx, begin_ex);
            debug!(
                stream = self.upstream.reply_id,
                correlate = winner.initial_id,
                "correlated reply accepted"
            );
        }
        Ok(())
    }

    fn on_correlate_end(&mut self, index: usize, cx: &mut ProxyContext<'_>) {
        if let Some(correlate) = self.correlates.get_mut(index) {
            correlate.do_end(Half::Initial, cx);
        }
        match self.winner {
            Some(winner) if winner == index => {
                self.upstream.do_end(Half::Reply, cx);
            }
            Some(_) => {}
            None => {
                if self.correlates.iter().all(|c| c.state.reply.is_closed()) {
                    warn!(stream = self.upstream.initial_id, "correlates ended without reply");
                    self.cleanup(cx);
                }
            }
        }
    }

    fn on_correlate_failed(&mut self, index: usize, cx: &mut ProxyContext<'_>) {
        match self.winner {
            Some(winner) if winner != index => {
                if let Some(loser) = self.correlates.get_mut(index) {
                    loser.abort_pair(Half::Initial, cx);
                }
            }
            _ => {
                warn!(stream = self.upstream.initial_id, correlate = index, "correlate failed");
                self.cleanup(cx);
            }
        }
    }
}

impl Proxy for CorrelatedProxy {
    fn on_frame(&mut self, leg: Leg, frame: Frame, cx: &mut ProxyContext<'_>) {
        let result = match (leg, Half::of(frame.header().stream_id)) {
            (Leg::Upstream, Half::Initial) => self.on_upstream_initial(frame, cx),
            (Leg::Upstream, Half::Reply) => self.on_upstream_reply(frame, cx),
            (Leg::Downstream(0), _) => self.on_produce(frame, cx),
            (Leg::Downstream(n), _) => self.on_correlate(n - 1, frame, cx),
        };

        if let Err(e) = result {
            warn!(stream = self.upstream.initial_id, ?leg, "request failed: {}", e);
            self.cleanup(cx);
        }
    }

    fn cleanup(&mut self, cx: &mut ProxyContext<'_>) {
        self.pending.clear();
        self.upstream.do_reset(Half::Initial, cx);
        self.upstream.do_abort(Half::Reply, cx);
        if let Some(produce) = self.produce.as_mut() {
            produce.abort_pair(Half::Initial, cx);
        }
        for correlate in &mut self.correlates {
            correlate.abort_pair(Half::Initial, cx);
        }
    }

    fn is_reclaimable(&self) -> bool {
        self.upstream.state.is_closed()
            && self.produce.as_ref().map_or(true, StreamPair::is_done)
            && self.correlates.iter().all(StreamPair::is_done)
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
