//! Stream engine: routes decoded frames to the proxy owning their stream.
//!
//! Frames are keyed by `(routed_id, stream_id)`. An initial BEGIN on an
//! unknown key is resolved through the [`BindingAdapter`] into a new proxy;
//! unresolvable streams are answered with RESET on the initial half and
//! ABORT on the reply half. A proxy is dropped, with all its keys, once
//! every half it owns is closed.
//!
//! The engine is synchronous. Every frame it emits is encoded into its
//! single [`WriteBuffer`] and handed to the sink before the next one.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use wirebridge::binding::RouteTable;
//! use wirebridge::config::BindingConfig;
//! use wirebridge::engine::StreamEngine;
//! use wirebridge::protocol::{BeginFrame, Frame, StreamHeader};
//!
//! let table = RouteTable::with_bindings([
//!     BindingConfig::from_json(r#"{ "id": 1, "routes": [{ "exit": 2 }] }"#).unwrap(),
//! ])
//! .unwrap();
//! let mut engine = StreamEngine::new(table, Vec::<Bytes>::new());
//!
//! engine.on_frame(Frame::Begin(BeginFrame::new(StreamHeader::new(0, 1, 5))));
//! assert_eq!(engine.stats().open_proxies, 1);
//! assert_eq!(engine.sink().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::binding::BindingAdapter;
use crate::config::BindingConfig;
use crate::error::Result;
use crate::flow::{Half, IdSupplier, SequentialIds};
use crate::protocol::{BeginFrame, Frame, FrameSink, WriteBuffer};
use crate::proxy::{new_proxy, Leg, Proxy};
use crate::stream::{ProxyContext, StreamPair};

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub open_proxies: usize,
    pub frames_in: u64,
    pub frames_out: u64,
    pub rejected_streams: u64,
    pub reclaimed: u64,
}

pub struct StreamEngine<S: FrameSink> {
    adapter: Box<dyn BindingAdapter>,
    ids: Arc<dyn IdSupplier>,
    buffer: WriteBuffer,
    sink: S,
    proxies: HashMap<u64, Box<dyn Proxy>>,
    /// `(routed_id, stream_id)` to owning proxy and leg.
    routes: HashMap<(u64, u64), (u64, Leg)>,
    next_proxy_id: u64,
    stats: EngineStats,
}

impl<S: FrameSink> StreamEngine<S> {
    pub fn new(adapter: impl BindingAdapter + 'static, sink: S) -> Self {
        Self {
            adapter: Box::new(adapter),
            ids: Arc::new(SequentialIds::new()),
            buffer: WriteBuffer::new(),
            sink,
            proxies: HashMap::new(),
            routes: HashMap::new(),
            next_proxy_id: 1,
            stats: EngineStats::default(),
        }
    }

    /// Use a shared id supplier.
    pub fn with_ids(mut self, ids: Arc<dyn IdSupplier>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_write_buffer(mut self, buffer: WriteBuffer) -> Self {
        self.buffer = buffer;
        self
    }

    /// Handle one inbound frame.
    pub fn on_frame(&mut self, frame: Frame) {
        self.stats.frames_in += 1;
        let header = *frame.header();

        if let Some(&(proxy_id, leg)) = self.routes.get(&(header.routed_id, header.stream_id)) {
            self.dispatch(proxy_id, leg, frame);
            return;
        }

        match frame {
            Frame::Begin(begin) if header.is_initial() => self.on_new_stream(begin),
            other => {
                debug!(
                    routed = header.routed_id,
                    stream = header.stream_id,
                    kind = %other.kind(),
                    "frame for unknown stream dropped"
                );
            }
        }
    }

    fn on_new_stream(&mut self, begin: BeginFrame) {
        let header = begin.header;
        let reply_id = self.ids.supply_reply_id(header.stream_id);
        let mut upstream =
            StreamPair::new(header.origin_id, header.routed_id, header.stream_id, reply_id);

        let Some(route) =
            self.adapter
                .resolve(header.routed_id, header.authorization, &begin.extension)
        else {
            if let Err(e) = upstream.on_begin(Half::Initial, &begin) {
                debug!(stream = header.stream_id, "rejected BEGIN also invalid: {}", e);
            }
            let mut cx = ProxyContext::new(
                &mut self.buffer,
                &mut self.sink,
                &*self.ids,
                header.trace_id,
            );
            upstream.do_reset(Half::Initial, &mut cx);
            upstream.do_abort(Half::Reply, &mut cx);
            let (_, written) = cx.finish();
            self.stats.frames_out += written;
            self.stats.rejected_streams += 1;
            warn!(
                routed = header.routed_id,
                stream = header.stream_id,
                "no route, stream rejected"
            );
            return;
        };

        let proxy_id = self.next_proxy_id;
        self.next_proxy_id += 1;
        debug!(
            proxy = proxy_id,
            routed = header.routed_id,
            stream = header.stream_id,
            exit = route.exit,
            "stream accepted"
        );

        self.proxies.insert(proxy_id, new_proxy(route, upstream));
        self.routes
            .insert((header.routed_id, header.stream_id), (proxy_id, Leg::Upstream));
        self.routes
            .insert((header.routed_id, reply_id), (proxy_id, Leg::Upstream));
        self.stats.open_proxies = self.proxies.len();

        self.dispatch(proxy_id, Leg::Upstream, Frame::Begin(begin));
    }

    fn dispatch(&mut self, proxy_id: u64, leg: Leg, frame: Frame) {
        let Some(proxy) = self.proxies.get_mut(&proxy_id) else {
            return;
        };

        let trace_id = frame.header().trace_id;
        let mut cx = ProxyContext::new(&mut self.buffer, &mut self.sink, &*self.ids, trace_id);
        proxy.on_frame(leg, frame, &mut cx);
        let (registrations, written) = cx.finish();
        let reclaimable = proxy.is_reclaimable();

        self.stats.frames_out += written;
        for registration in registrations {
            let owner = (proxy_id, registration.leg);
            self.routes
                .insert((registration.routed_id, registration.initial_id), owner);
            self.routes
                .insert((registration.routed_id, registration.reply_id), owner);
        }

        if reclaimable {
            self.reclaim(proxy_id);
        }
    }

    fn reclaim(&mut self, proxy_id: u64) {
        if self.proxies.remove(&proxy_id).is_none() {
            return;
        }
        self.routes.retain(|_, (owner, _)| *owner != proxy_id);
        self.stats.reclaimed += 1;
        self.stats.open_proxies = self.proxies.len();
        debug!(proxy = proxy_id, "proxy reclaimed");
    }

    /// Add or replace a binding. Open streams keep their routes.
    pub fn attach(&mut self, config: BindingConfig) -> Result<()> {
        self.adapter.attach(config)
    }

    /// Remove a binding. Open streams keep their routes.
    pub fn detach(&mut self, id: u64) -> bool {
        self.adapter.detach(id)
    }

    /// Abort every open proxy, e.g. once the transport has closed.
    pub fn shutdown(&mut self) {
        let proxies = std::mem::take(&mut self.proxies);
        let count = proxies.len();
        for (_, mut proxy) in proxies {
            let mut cx = ProxyContext::new(&mut self.buffer, &mut self.sink, &*self.ids, 0);
            proxy.cleanup(&mut cx);
            let (_, written) = cx.finish();
            self.stats.frames_out += written;
            self.stats.reclaimed += 1;
        }
        self.routes.clear();
        self.stats.open_proxies = 0;
        if count > 0 {
            debug!(proxies = count, "engine shut down");
        }
    }

    #[inline]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
