//! Gateway builder and runtime loop.
//!
//! The [`GatewayBuilder`] collects engine settings and bindings. A built
//! [`Gateway`] is spawned over any duplex transport:
//! 1. Split the transport
//! 2. Spawn the writer task
//! 3. Read frames and dispatch them into the [`StreamEngine`]
//! 4. Abort every open proxy once the transport closes
//!
//! # Example
//!
//! ```ignore
//! use wirebridge::{BindingConfig, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> wirebridge::Result<()> {
//!     let (transport, _peer) = tokio::io::duplex(64 * 1024);
//!     let handle = Gateway::builder()
//!         .binding(BindingConfig::from_json(r#"{ "id": 1, "routes": [{ "exit": 2 }] }"#)?)
//!         .build()?
//!         .spawn(transport);
//!
//!     let stats = handle.join().await?;
//!     println!("{:?}", stats);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::binding::RouteTable;
use crate::config::{BindingConfig, EngineConfig};
use crate::engine::{EngineStats, StreamEngine};
use crate::error::{GatewayError, Result};
use crate::flow::{IdSupplier, SequentialIds};
use crate::protocol::{FrameBuffer, WriteBuffer};
use crate::writer::{spawn_writer_task, WriterSink};

/// Size of each transport read.
const READ_CHUNK_SIZE: usize = 64 * 1024;

const CONTROL_CAPACITY: usize = 16;

/// Builder for configuring and creating a [`Gateway`].
pub struct GatewayBuilder {
    config: EngineConfig,
    bindings: Vec<BindingConfig>,
    ids: Option<Arc<dyn IdSupplier>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            bindings: Vec::new(),
            ids: None,
        }
    }

    /// Replace every engine setting at once.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the largest frame accepted from or written to the transport.
    ///
    /// Default: 64 KiB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the maximum pending outbound frames before reading pauses.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set how long reading may stall waiting for the writer.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.backpressure_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Add a binding available from the start.
    pub fn binding(mut self, binding: BindingConfig) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Share an id supplier with other gateways in the process.
    pub fn ids(mut self, ids: Arc<dyn IdSupplier>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate the configuration and every binding.
    pub fn build(self) -> Result<Gateway> {
        self.config.validate()?;
        let table = RouteTable::with_bindings(self.bindings)?;
        Ok(Gateway {
            config: self.config,
            table,
            ids: self
                .ids
                .unwrap_or_else(|| Arc::new(SequentialIds::new())),
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured gateway, ready to serve one transport.
pub struct Gateway {
    config: EngineConfig,
    table: RouteTable,
    ids: Arc<dyn IdSupplier>,
}

enum Control {
    Attach(BindingConfig, oneshot::Sender<Result<()>>),
    Detach(u64, oneshot::Sender<bool>),
    Stats(oneshot::Sender<EngineStats>),
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Serve `transport` on a background task.
    pub fn spawn<T>(self, transport: T) -> GatewayHandle
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        let (writer, writer_task) = spawn_writer_task(writer, self.config.writer_config());

        let engine = StreamEngine::new(self.table, WriterSink::new(writer))
            .with_ids(self.ids)
            .with_write_buffer(WriteBuffer::with_capacity(
                self.config.write_buffer_capacity,
                self.config.max_frame_size,
            ));
        let frames = FrameBuffer::with_max_frame_size(self.config.max_frame_size);

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let task = tokio::spawn(run(reader, frames, engine, control_rx, writer_task));

        GatewayHandle {
            control: control_tx,
            task,
        }
    }
}

/// Handle to a running gateway.
pub struct GatewayHandle {
    control: mpsc::Sender<Control>,
    task: JoinHandle<Result<EngineStats>>,
}

impl GatewayHandle {
    /// Add or replace a binding without disturbing open streams.
    pub async fn attach(&self, binding: BindingConfig) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Control::Attach(binding, tx)).await?;
        rx.await.map_err(|_| GatewayError::ConnectionClosed)?
    }

    /// Remove a binding. Returns false if it was not attached.
    pub async fn detach(&self, id: u64) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(Control::Detach(id, tx)).await?;
        rx.await.map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Snapshot of the engine counters.
    pub async fn stats(&self) -> Result<EngineStats> {
        let (tx, rx) = oneshot::channel();
        self.request(Control::Stats(tx)).await?;
        rx.await.map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Wait for the transport to close and return the final counters.
    pub async fn join(self) -> Result<EngineStats> {
        drop(self.control);
        self.task.await.map_err(join_error)?
    }

    async fn request(&self, control: Control) -> Result<()> {
        self.control
            .send(control)
            .await
            .map_err(|_| GatewayError::ConnectionClosed)
    }
}

/// Main loop - reads frames and dispatches them into the engine.
async fn run<R>(
    mut reader: R,
    mut frames: FrameBuffer,
    mut engine: StreamEngine<WriterSink>,
    mut control: mpsc::Receiver<Control>,
    writer_task: JoinHandle<Result<()>>,
) -> Result<EngineStats>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    let outcome = loop {
        if let Err(e) = admit(engine.sink_mut()).await {
            break Err(e);
        }

        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => n,
                    Err(e) => break Err(GatewayError::Io(e)),
                };
                match frames.push(&buf[..n]) {
                    Ok(decoded) => {
                        for frame in decoded {
                            engine.on_frame(frame);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
            Some(request) = control.recv() => on_control(&mut engine, request),
        }
    };

    match &outcome {
        Ok(()) => debug!("transport closed"),
        Err(e) => error!("gateway loop failed: {}", e),
    }

    engine.shutdown();
    if let Err(e) = engine.sink_mut().drain().await {
        debug!("dropping frames after shutdown: {}", e);
    }
    let stats = engine.stats();
    drop(engine);

    match writer_task.await.map_err(join_error)? {
        Ok(()) => {}
        Err(e) => warn!("writer task failed: {}", e),
    }

    outcome.map(|()| stats)
}

/// Hold off reading while the writer is behind.
async fn admit(sink: &mut WriterSink) -> Result<()> {
    sink.drain().await?;
    if sink.handle().is_backpressure_active() {
        sink.handle().wait_for_backpressure().await?;
    }
    Ok(())
}

fn on_control(engine: &mut StreamEngine<WriterSink>, request: Control) {
    match request {
        Control::Attach(binding, reply) => {
            let id = binding.id;
            let result = engine.attach(binding);
            match &result {
                Ok(()) => debug!(binding = id, "binding attached"),
                Err(e) => warn!(binding = id, "attach rejected: {}", e),
            }
            let _ = reply.send(result);
        }
        Control::Detach(id, reply) => {
            let removed = engine.detach(id);
            debug!(binding = id, removed, "binding detached");
            let _ = reply.send(removed);
        }
        Control::Stats(reply) => {
            let _ = reply.send(engine.stats());
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> GatewayError {
    GatewayError::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let gateway = GatewayBuilder::default().build().unwrap();
        assert!(gateway.table.is_empty());
        assert_eq!(gateway.config, EngineConfig::default());
        assert_eq!(gateway.config.max_frame_size, crate::protocol::DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(gateway.config.max_frame_size, 64 * 1024);
    }

    #[test]
    fn test_builder_method_chaining() {
        let gateway = Gateway::builder()
            .max_frame_size(4096)
            .max_pending_frames(8)
            .channel_capacity(4)
            .backpressure_timeout(Duration::from_millis(250))
            .binding(BindingConfig::from_json(r#"{ "id": 1, "routes": [{ "exit": 2 }] }"#).unwrap())
            .build()
            .unwrap();

        assert_eq!(gateway.config.max_frame_size, 4096);
        assert_eq!(gateway.config.max_pending_frames, 8);
        assert_eq!(gateway.config.channel_capacity, 4);
        assert_eq!(gateway.config.backpressure_timeout_ms, 250);
        assert!(gateway.table.get(1).is_some());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Gateway::builder().channel_capacity(0).build();
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn test_runtime_attach_detach() {
        let (transport, _peer) = tokio::io::duplex(1024);
        let handle = Gateway::builder().build().unwrap().spawn(transport);

        handle
            .attach(BindingConfig::from_json(r#"{ "id": 7, "routes": [{ "exit": 8 }] }"#).unwrap())
            .await
            .unwrap();
        assert!(handle.detach(7).await.unwrap());
        assert!(!handle.detach(7).await.unwrap());
        assert_eq!(handle.stats().await.unwrap(), EngineStats::default());
    }

    #[tokio::test]
    async fn test_join_after_peer_closes() {
        let (transport, peer) = tokio::io::duplex(1024);
        let handle = Gateway::builder().build().unwrap().spawn(transport);

        drop(peer);
        let stats = handle.join().await.unwrap();
        assert_eq!(stats.frames_in, 0);
    }
}
