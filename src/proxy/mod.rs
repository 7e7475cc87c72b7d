//! Proxy module - bridges composing an upstream pair with downstream pairs.
//!
//! Provides:
//! - [`Proxy`] - frame callbacks invoked by the engine
//! - [`TunnelProxy`] - one downstream pair, frames passed through
//! - [`CorrelatedProxy`] - produce pair plus racing correlate pairs, or a
//!   produce pair alone for routes that expect no reply
//!
//! A proxy is driven strictly by frame callbacks and never blocks. Waiting
//! for credit means returning and resuming on the next WINDOW.

mod correlated;
mod tunnel;

pub use correlated::CorrelatedProxy;
pub use tunnel::TunnelProxy;

use crate::binding::{Route, RouteKind};
use crate::protocol::Frame;
use crate::stream::{ProxyContext, StreamPair};

/// Which owned pair a frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    Upstream,
    /// Index of the downstream pair within its proxy.
    Downstream(usize),
}

/// A bridge instance owning one upstream pair.
pub trait Proxy: Send {
    /// Handle a frame addressed to one of the owned pairs.
    fn on_frame(&mut self, leg: Leg, frame: Frame, cx: &mut ProxyContext<'_>);

    /// Abort and reset every owned half that is not closed.
    fn cleanup(&mut self, cx: &mut ProxyContext<'_>);

    /// All owned halves are closed.
    fn is_reclaimable(&self) -> bool;
}

/// Instantiate the bridge for a resolved route.
pub fn new_proxy(route: Route, upstream: StreamPair) -> Box<dyn Proxy> {
    match route.kind {
        RouteKind::Tunnel => Box::new(TunnelProxy::new(upstream, route.exit, route.padding)),
        RouteKind::Correlated(config) => Box::new(CorrelatedProxy::new(
            upstream,
            route.exit,
            route.padding,
            config,
        )),
        RouteKind::Produce(config) => Box::new(CorrelatedProxy::produce_only(
            upstream,
            route.exit,
            route.padding,
            config,
        )),
    }
}
