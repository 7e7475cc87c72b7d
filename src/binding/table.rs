//! Route table backed by binding configuration.
//!
//! Bindings are keyed by routed id. Routes are tried in order and the first
//! one whose guard and header conditions match wins.

use std::collections::HashMap;

use tracing::debug;

use super::ext::{find_header, RequestBeginEx, REQUEST_TYPE_ID};
use super::{BindingAdapter, Route, RouteKind};
use crate::codec::Extension;
use crate::config::{BindingConfig, RouteConfig, WithConfig};
use crate::error::Result;

/// Bindings by routed id.
#[derive(Debug, Default)]
pub struct RouteTable {
    bindings: HashMap<u64, BindingConfig>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from configurations.
    pub fn with_bindings(configs: impl IntoIterator<Item = BindingConfig>) -> Result<Self> {
        let mut table = Self::new();
        for config in configs {
            table.attach(config)?;
        }
        Ok(table)
    }

    /// Get a binding by id.
    pub fn get(&self, id: u64) -> Option<&BindingConfig> {
        self.bindings.get(&id)
    }

    /// Number of attached bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn matches(route: &RouteConfig, authorization: u64, headers: &RequestBeginEx) -> bool {
        if route.guarded.is_some_and(|guard| guard != authorization) {
            return false;
        }
        route.when.is_empty()
            || route
                .when
                .iter()
                .any(|condition| condition.matches(|name| find_header(&headers.headers, name)))
    }
}

impl BindingAdapter for RouteTable {
    fn resolve(&self, routed_id: u64, authorization: u64, begin_ex: &Extension) -> Option<Route> {
        let binding = self.bindings.get(&routed_id)?;
        let headers = begin_ex
            .decode_if::<RequestBeginEx>(REQUEST_TYPE_ID)
            .unwrap_or_default();

        let route = binding
            .routes
            .iter()
            .find(|route| Self::matches(route, authorization, &headers))?;

        debug!(binding = routed_id, exit = route.exit, "route resolved");

        Some(Route {
            binding_id: routed_id,
            exit: route.exit,
            padding: route.padding,
            kind: match &route.with {
                WithConfig::Tunnel => RouteKind::Tunnel,
                WithConfig::Correlated(correlated) => RouteKind::Correlated(correlated.clone()),
                WithConfig::Produce(produce) => RouteKind::Produce(produce.clone()),
            },
        })
    }

    fn attach(&mut self, config: BindingConfig) -> Result<()> {
        config.validate()?;
        debug!(binding = config.id, routes = config.routes.len(), "binding attached");
        self.bindings.insert(config.id, config);
        Ok(())
    }

    fn detach(&mut self, id: u64) -> bool {
        let removed = self.bindings.remove(&id).is_some();
        if removed {
            debug!(binding = id, "binding detached");
        }
        removed
    }
}
