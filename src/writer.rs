//! Dedicated writer task: the single outbound path onto the transport.
//!
//! Every frame a session emits (stream data, window updates, pings,
//! go-aways) is queued on one channel and written by one task, so frames
//! can never interleave on the wire.
//!
//! # Architecture
//!
//! ```text
//! Stream 1 ─┐
//! Stream 2 ─┼─► mpsc::UnboundedSender<WriterCommand> ─► Writer Task ─► Transport
//! Session  ─┘
//! ```
//!
//! The queue is unbounded because its growth is already bounded by flow
//! control: a stream can never have more than its send window in flight.
//! Frames are enqueued synchronously, which lets streams send while
//! holding their own lock and keeps per-stream FIFO order.

use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{MuxError, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the transport.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (12 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for everything but Data frames).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Create a new outbound frame with empty payload.
    #[inline]
    pub fn empty(header: &Header) -> Self {
        Self {
            header: header.encode(),
            payload: Bytes::new(),
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Commands understood by the writer task.
#[derive(Debug)]
pub(crate) enum WriterCommand {
    /// Write a frame.
    Frame(OutboundFrame),
    /// Flush what is queued, then end the transport's outbound side.
    Finish,
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; every stream of a session holds one.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<WriterCommand>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
    /// Set once the outbound side has been ended.
    ended: Arc<AtomicBool>,
}

impl WriterHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<WriterCommand>) -> Self {
        Self {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a frame for the writer task.
    ///
    /// Refused with `SessionShutdown` once the outbound side has ended.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.ended.load(Ordering::Acquire) {
            return Err(MuxError::SessionShutdown);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(WriterCommand::Frame(frame)).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            MuxError::SessionShutdown
        })
    }

    /// Queue a header-only frame.
    #[inline]
    pub fn send_header(&self, header: &Header) -> Result<()> {
        self.send(OutboundFrame::empty(header))
    }

    /// End the outbound side after the frames already queued.
    ///
    /// Idempotent; later sends are refused.
    pub fn finish(&self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(WriterCommand::Finish);
        }
    }

    /// Whether the outbound side has been ended.
    #[inline]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// Each batch must reach the transport within `write_timeout`, otherwise
/// the task fails with `ConnectionWriteTimeout`.
pub fn spawn_writer_task<W>(
    writer: W,
    write_timeout: Duration,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = WriterHandle::new(tx);

    let task = tokio::spawn(writer_loop(rx, writer, handle.pending.clone(), write_timeout));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the transport.
async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    write_timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(WriterCommand::Frame(frame)) => frame,
            Some(WriterCommand::Finish) | None => {
                return finish(&mut writer, write_timeout).await;
            }
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        let mut finishing = false;

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(WriterCommand::Frame(frame)) => batch.push(frame),
                Ok(WriterCommand::Finish) => {
                    finishing = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        tokio::time::timeout(write_timeout, write_batch(&mut writer, &batch))
            .await
            .map_err(|_| MuxError::ConnectionWriteTimeout)??;

        pending.fetch_sub(batch_size, Ordering::Release);

        if finishing {
            return finish(&mut writer, write_timeout).await;
        }
    }
}

/// Shut down the transport's write half.
async fn finish<W>(writer: &mut W, write_timeout: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(write_timeout, writer.shutdown())
        .await
        .map_err(|_| MuxError::ConnectionWriteTimeout)??;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(MuxError::from(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_start = skipped;
        let header_end = skipped + HEADER_SIZE;

        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&frame.header[start_in_header..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
