//! Error types for wirebridge.

use thiserror::Error;

use crate::flow::FlowError;

/// Main error type for all gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading binding configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (extension encoding).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (extension decoding).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Frame could not be decoded.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Protocol error (unknown frame type, oversized frame, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Flow-control window violation.
    #[error("Flow control violation: {0}")]
    Flow(#[from] FlowError),

    /// Correlation hash used out of order.
    #[error("Correlation error: {0}")]
    Correlation(String),

    /// Invalid binding or engine configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No binding configured for the given routed id.
    #[error("Unknown binding: {0}")]
    UnknownBinding(u64),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;
