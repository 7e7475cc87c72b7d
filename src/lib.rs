//! # wirebridge
//!
//! Duplex stream-proxy engine for protocol-mediation gateways.
//!
//! Streams are pairs of flow-controlled halves carried as binary frames.
//! A proxy composes the upstream pair with one or more downstream pairs,
//! translating metadata while keeping both windows aligned:
//!
//! - **Tunnel**: frames pass through to a single downstream pair
//! - **Correlated**: the request is produced to a topic and the reply is
//!   raced for on one or more reply topics, matched by a content hash
//!
//! ## Architecture
//!
//! - **Protocol**: frame envelope, stream header and frame kinds
//! - **Flow**: windows, half states and stream ids
//! - **Engine**: synchronous frame routing to proxies
//! - **Gateway**: async read loop plus a batching writer task
//!
//! ## Example
//!
//! ```ignore
//! use wirebridge::{BindingConfig, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> wirebridge::Result<()> {
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:7000").await?;
//!     let (socket, _) = listener.accept().await?;
//!
//!     let handle = Gateway::builder()
//!         .binding(BindingConfig::from_json(r#"{ "id": 1, "routes": [{ "exit": 2 }] }"#)?)
//!         .build()?
//!         .spawn(socket);
//!
//!     handle.join().await?;
//!     Ok(())
//! }
//! ```

pub mod binding;
pub mod codec;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod protocol;
pub mod proxy;
pub mod stream;
pub mod writer;

pub use binding::{BindingAdapter, Route, RouteTable};
pub use config::{BindingConfig, EngineConfig};
pub use engine::{EngineStats, StreamEngine};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayBuilder, GatewayHandle};
