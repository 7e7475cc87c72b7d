//! Dedicated writer task for outbound frames.
//!
//! The engine encodes frames synchronously; this task owns the transport's
//! write half and receives already-encoded frames over an mpsc channel,
//! batching ready frames into single vectored writes.
//!
//! # Architecture
//!
//! ```text
//! StreamEngine ─► WriterSink ─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Transport
//!                     │
//!                     └─ overflow (drained by the gateway between reads)
//! ```
//!
//! Frames queued but not yet written count against a limit. At the limit
//! the gateway stops reading the transport until the writer catches up.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::protocol::FrameSink;

/// Queued frames at which reading pauses.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// How long a sender waits for the queue to fall below the limit.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames coalesced into one vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded frame ready to be written.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub bytes: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Copy an encoded frame out of a scratch buffer.
    #[inline]
    pub fn copy_from(encoded: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(encoded),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Writer task settings, usually derived from [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_pending_frames: usize,
    pub channel_capacity: usize,
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Frames handed to the writer task and not yet written out.
#[derive(Debug, Default)]
struct Queued {
    frames: AtomicUsize,
    written: Notify,
}

impl Queued {
    #[inline]
    fn count(&self) -> usize {
        self.frames.load(Ordering::Acquire)
    }

    #[inline]
    fn add(&self) {
        self.frames.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, frames: usize) {
        self.frames.fetch_sub(frames, Ordering::AcqRel);
        self.written.notify_waiters();
    }
}

/// Cloneable sender side of the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    queued: Arc<Queued>,
    limit: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundFrame>, queued: Arc<Queued>, limit: usize, timeout: Duration) -> Self {
        Self {
            tx,
            queued,
            limit,
            timeout,
        }
    }

    /// Queue a frame, first waiting out backpressure.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            self.wait_for_backpressure().await?;
        }

        // Count first so a fast writer never releases more than was added.
        self.queued.add();
        self.tx.send(frame).await.map_err(|_| {
            self.queued.release(1);
            GatewayError::ConnectionClosed
        })
    }

    /// Wait until the queue falls below the limit.
    ///
    /// Woken by the writer task after each batch rather than by polling.
    pub async fn wait_for_backpressure(&self) -> Result<()> {
        let below_limit = async {
            loop {
                let written = self.queued.written.notified();
                tokio::pin!(written);
                written.as_mut().enable();
                if self.queued.count() < self.limit {
                    return;
                }
                written.await;
            }
        };

        tokio::time::timeout(self.timeout, below_limit)
            .await
            .map_err(|_| GatewayError::BackpressureTimeout)
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.queued.count() >= self.limit
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.queued.count()
    }

    /// Queue a frame without waiting.
    ///
    /// Returns the frame back with the error so the caller may retry it.
    pub fn try_send(&self, frame: OutboundFrame) -> std::result::Result<(), (GatewayError, OutboundFrame)> {
        if self.is_backpressure_active() {
            return Err((GatewayError::BackpressureTimeout, frame));
        }

        self.queued.add();
        self.tx.try_send(frame).map_err(|e| {
            self.queued.release(1);
            match e {
                mpsc::error::TrySendError::Full(frame) => (GatewayError::BackpressureTimeout, frame),
                mpsc::error::TrySendError::Closed(frame) => (GatewayError::ConnectionClosed, frame),
            }
        })
    }
}

/// [`FrameSink`] feeding the writer task from synchronous engine callbacks.
///
/// Frames that cannot be queued immediately are kept in order in an
/// overflow queue until [`WriterSink::drain`] is awaited.
pub struct WriterSink {
    handle: WriterHandle,
    overflow: VecDeque<OutboundFrame>,
    closed: bool,
}

impl WriterSink {
    pub fn new(handle: WriterHandle) -> Self {
        Self {
            handle,
            overflow: VecDeque::new(),
            closed: false,
        }
    }

    pub fn handle(&self) -> &WriterHandle {
        &self.handle
    }

    /// Frames waiting for room in the writer channel.
    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// Writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send every overflowed frame, waiting for room as needed.
    pub async fn drain(&mut self) -> Result<()> {
        while let Some(frame) = self.overflow.pop_front() {
            if let Err(e) = self.handle.send(frame.clone()).await {
                self.overflow.push_front(frame);
                if matches!(e, GatewayError::ConnectionClosed) {
                    self.closed = true;
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

impl FrameSink for WriterSink {
    fn accept(&mut self, frame: &[u8]) {
        if self.closed {
            return;
        }
        let frame = OutboundFrame::copy_from(frame);
        if !self.overflow.is_empty() {
            self.overflow.push_back(frame);
            return;
        }
        match self.handle.try_send(frame) {
            Ok(()) => {}
            Err((GatewayError::ConnectionClosed, _)) => {
                warn!("writer closed, dropping outbound frames");
                self.closed = true;
            }
            Err((_, frame)) => self.overflow.push_back(frame),
        }
    }
}

/// Spawn the writer task over `writer`.
///
/// The `JoinHandle` resolves once every handle is dropped and the queue is
/// written out, or on the first write error.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let queued = Arc::new(Queued::default());
    let handle = WriterHandle::new(
        tx,
        Arc::clone(&queued),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    (handle, tokio::spawn(writer_loop(rx, writer, queued)))
}

pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W, queued: Arc<Queued>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    loop {
        if rx.recv_many(&mut batch, MAX_BATCH_SIZE).await == 0 {
            writer.shutdown().await.ok();
            return Ok(());
        }
        write_batch(&mut writer, &batch).await?;
        queued.release(batch.len());
        batch.clear();
    }
}

/// Write every frame of `batch` with vectored writes, resuming after
/// partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(batch, written);
        match writer.write_vectored(&slices).await? {
            0 => {
                return Err(GatewayError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "transport accepted no bytes",
                )))
            }
            n => written += n,
        }
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering `batch` past its first `skip` bytes.
fn remaining_slices(batch: &[OutboundFrame], skip: usize) -> Vec<IoSlice<'_>> {
    let mut offset = 0;
    batch
        .iter()
        .filter_map(|frame| {
            let start = offset;
            offset += frame.size();
            (skip < offset).then(|| IoSlice::new(&frame.bytes[skip.saturating_sub(start)..]))
        })
        .collect()
}
