//! Engine and binding configuration.
//!
//! Binding configuration is JSON:
//!
//! ```json
//! {
//!   "id": 1,
//!   "routes": [
//!     {
//!       "exit": 2,
//!       "when": [{ "headers": { ":method": "POST", ":path": "/items*" } }],
//!       "with": {
//!         "kind": "correlated",
//!         "topic": "items-requests",
//!         "key": "idempotency-key",
//!         "reply_to": ["items-responses"],
//!         "correlation": { "header": "correlation-id", "prefix": "items" }
//!       }
//!     },
//!     { "exit": 3 }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::protocol::{
    ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_WRITE_BUFFER_CAPACITY,
};
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

/// Runtime settings for one gateway connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial capacity of the encode scratch buffer.
    pub write_buffer_capacity: usize,
    /// Largest encoded frame accepted or produced.
    pub max_frame_size: u32,
    /// Writer channel capacity.
    pub channel_capacity: usize,
    /// Pending outbound frames before reading pauses.
    pub max_pending_frames: usize,
    /// How long to wait for the writer to catch up.
    pub backpressure_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_buffer_capacity: DEFAULT_WRITE_BUFFER_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl EngineConfig {
    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_frames: self.max_pending_frames,
            channel_capacity: self.channel_capacity,
            backpressure_timeout: self.backpressure_timeout(),
        }
    }

    /// Check limits.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size > ABSOLUTE_MAX_FRAME_SIZE {
            return Err(GatewayError::Config(format!(
                "max_frame_size {} exceeds {}",
                self.max_frame_size, ABSOLUTE_MAX_FRAME_SIZE
            )));
        }
        if self.channel_capacity == 0 || self.max_pending_frames == 0 {
            return Err(GatewayError::Config(
                "channel_capacity and max_pending_frames must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Routes of one binding, addressed by its routed id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    pub id: u64,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl BindingConfig {
    /// Parse and validate JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BindingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (index, route) in self.routes.iter().enumerate() {
            if route.exit == self.id {
                return Err(GatewayError::Config(format!(
                    "binding {} route {} exits to itself",
                    self.id, index
                )));
            }
            if let WithConfig::Produce(produce) = &route.with {
                if produce.topic.is_empty() {
                    return Err(GatewayError::Config(format!(
                        "binding {} route {} has an empty topic",
                        self.id, index
                    )));
                }
            }
            if let WithConfig::Correlated(correlated) = &route.with {
                if correlated.reply_to.is_empty() {
                    return Err(GatewayError::Config(format!(
                        "binding {} route {} has no reply_to topics",
                        self.id, index
                    )));
                }
                if correlated.correlation.header.is_empty() {
                    return Err(GatewayError::Config(format!(
                        "binding {} route {} has an empty correlation header",
                        self.id, index
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One route of a binding. The first matching route wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Downstream routed id.
    pub exit: u64,
    /// Any condition may match; no conditions matches everything.
    #[serde(default)]
    pub when: Vec<ConditionConfig>,
    /// Required authorization, if any.
    #[serde(default)]
    pub guarded: Option<u64>,
    /// Extra per-fragment framing overhead of the downstream.
    #[serde(default)]
    pub padding: u32,
    #[serde(default)]
    pub with: WithConfig,
}

/// Header condition. All listed headers must match.
///
/// A value ending in `*` matches by prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionConfig {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ConditionConfig {
    pub fn matches<'a, F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        self.headers.iter().all(|(name, pattern)| match lookup(name) {
            Some(value) => match pattern.strip_suffix('*') {
                Some(prefix) => value.starts_with(prefix),
                None => value == pattern,
            },
            None => false,
        })
    }
}

/// Bridge variant of a route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WithConfig {
    /// Frames pass through unchanged.
    #[default]
    Tunnel,
    /// Produce the request, wait for a correlated reply.
    Correlated(CorrelatedConfig),
    /// Produce the request and acknowledge it once the event log has.
    Produce(ProduceConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceConfig {
    /// Topic requests are produced to.
    pub topic: String,
    /// Request header whose value becomes the message key.
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatedConfig {
    /// Topic requests are produced to.
    pub topic: String,
    /// Request header whose value becomes the message key.
    #[serde(default)]
    pub key: Option<String>,
    /// Topics replies may arrive on.
    pub reply_to: Vec<String>,
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Header carrying the correlation token.
    #[serde(default = "default_correlation_header")]
    pub header: String,
    /// Header naming each reply topic on the produced message.
    #[serde(default = "default_reply_to_header")]
    pub reply_to_header: String,
    /// Token prefix. Without one, the request must supply the header.
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_correlation_header() -> String {
    "correlation-id".to_string()
}

fn default_reply_to_header() -> String {
    "reply-to".to_string()
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            header: default_correlation_header(),
            reply_to_header: default_reply_to_header(),
            prefix: None,
        }
    }
}
