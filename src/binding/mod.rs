//! Binding module - route resolution and protocol-specific metadata.
//!
//! Provides:
//! - [`BindingAdapter`] - resolves an inbound BEGIN to a [`Route`]
//! - [`RouteTable`] - adapter backed by [`BindingConfig`]s
//! - typed extension records for the bridged protocols
//!
//! # Example
//!
//! ```
//! use wirebridge::binding::{BindingAdapter, RouteTable};
//! use wirebridge::codec::Extension;
//! use wirebridge::config::BindingConfig;
//!
//! let mut table = RouteTable::new();
//! table
//!     .attach(BindingConfig::from_json(r#"{ "id": 1, "routes": [{ "exit": 2 }] }"#).unwrap())
//!     .unwrap();
//!
//! let route = table.resolve(1, 0, &Extension::empty()).unwrap();
//! assert_eq!(route.exit, 2);
//! assert!(table.resolve(9, 0, &Extension::empty()).is_none());
//! ```

mod ext;
mod table;

pub use ext::{
    find_header, EventsBeginEx, EventsDataEx, HeaderEntry, RequestBeginEx, CONTENT_LENGTH,
    EVENTS_TYPE_ID, REQUEST_TYPE_ID, STATUS,
};
pub use table::RouteTable;

use crate::codec::Extension;
use crate::config::{BindingConfig, CorrelatedConfig, ProduceConfig};
use crate::error::Result;

/// Resolved target of a new upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Binding the stream originated from.
    pub binding_id: u64,
    /// Downstream routed id.
    pub exit: u64,
    /// Extra framing overhead added to credit granted upstream.
    pub padding: u32,
    pub kind: RouteKind,
}

/// Bridge variant to instantiate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// Pass frames through.
    Tunnel,
    /// Produce then correlate.
    Correlated(CorrelatedConfig),
    /// Produce and acknowledge without a reply.
    Produce(ProduceConfig),
}

/// Resolves routes and accepts configuration changes at runtime.
pub trait BindingAdapter: Send {
    /// Route for a BEGIN on `routed_id`, or `None` to reject the stream.
    fn resolve(&self, routed_id: u64, authorization: u64, begin_ex: &Extension) -> Option<Route>;

    /// Add or replace a binding. Open streams are unaffected.
    fn attach(&mut self, config: BindingConfig) -> Result<()>;

    /// Remove a binding. Open streams are unaffected.
    fn detach(&mut self, id: u64) -> bool;
}
