//! One multiplexed logical stream.
//!
//! A [`Stream`] is the user-facing handle; it implements tokio's
//! [`AsyncRead`] and [`AsyncWrite`], so it can be used like any other
//! duplex byte channel. The state it shares with the session lives in
//! `StreamShared`: the state machine, both flow-control windows, the
//! receive buffer and the wakers of a parked reader or writer.
//!
//! The session owns the stream table. Anything on this side that ends a
//! stream's life reports it by returning `true` ("deregister me"); the
//! caller removes the entry once the stream lock is released.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, warn};

use crate::error::{MuxError, Result};
use crate::protocol::{flags, Header, INITIAL_STREAM_WINDOW};
use crate::session::SessionShared;
use crate::writer::{OutboundFrame, WriterHandle};

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Opened locally, SYN not sent yet.
    Init,
    /// SYN sent, waiting for the remote's ACK.
    SynSent,
    /// Opened by the remote, ACK not sent yet.
    SynReceived,
    /// Both sides agreed the stream exists.
    Established,
    /// We sent FIN.
    LocalClose,
    /// The remote sent FIN.
    RemoteClose,
    /// Both directions done, or force-closed.
    Closed,
    /// The remote sent RST.
    Reset,
}

/// Mutable part of a stream, guarded by [`StreamShared::inner`].
#[derive(Debug)]
pub(crate) struct StreamInner {
    pub(crate) state: StreamState,
    /// Bytes the remote may still send us.
    pub(crate) recv_window: u32,
    /// Bytes we may still send the remote.
    pub(crate) send_window: u32,
    /// Received, not yet read.
    pub(crate) recv_buf: BytesMut,
    /// Stream-local error waiting to be reported to the consumer.
    error: Option<MuxError>,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
    /// When the waiting writer ran out of send window.
    parked_since: Option<Instant>,
}

impl StreamInner {
    fn new(state: StreamState) -> Self {
        Self {
            state,
            recv_window: INITIAL_STREAM_WINDOW,
            send_window: INITIAL_STREAM_WINDOW,
            recv_buf: BytesMut::new(),
            error: None,
            read_waker: None,
            write_waker: None,
            parked_since: None,
        }
    }

    /// Flags the next outbound frame must carry, advancing the handshake.
    fn send_flags(&mut self) -> u16 {
        match self.state {
            StreamState::Init => {
                self.state = StreamState::SynSent;
                flags::SYN
            }
            StreamState::SynReceived => {
                self.state = StreamState::Established;
                flags::ACK
            }
            _ => 0,
        }
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }

    fn wake_all(&mut self) {
        self.wake_reader();
        self.wake_writer();
    }

    fn fail(&mut self, err: MuxError) {
        self.error = Some(err);
        self.wake_all();
    }
}

/// Stream state shared between the session and the [`Stream`] handle.
pub(crate) struct StreamShared {
    id: u32,
    writer: WriterHandle,
    max_window: u32,
    write_timeout: Duration,
    pub(crate) inner: Mutex<StreamInner>,
}

impl StreamShared {
    pub(crate) fn new(
        id: u32,
        state: StreamState,
        writer: WriterHandle,
        max_window: u32,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id,
            writer,
            max_window,
            write_timeout,
            inner: Mutex::new(StreamInner::new(state)),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Announce a locally opened stream: the first window update carries SYN.
    pub(crate) fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.send_window_update(&mut inner)
    }

    /// Grant the remote the receive window consumed so far, if worth it.
    ///
    /// Updates smaller than half the maximum window are held back unless a
    /// handshake flag is pending.
    fn send_window_update(&self, inner: &mut StreamInner) -> Result<()> {
        if matches!(inner.state, StreamState::Closed | StreamState::Reset) {
            return Ok(());
        }

        let max = self.max_window;
        let buffered = inner.recv_buf.len() as u32;
        let delta = max.saturating_sub(buffered).saturating_sub(inner.recv_window);

        let flags = inner.send_flags();
        if delta < max / 2 && flags == 0 {
            return Ok(());
        }

        inner.recv_window += delta;
        self.writer
            .send_header(&Header::window_update(flags, self.id, delta))
    }

    /// FIN, best effort: nothing is sent once the session has ended.
    fn send_close(&self, pending: u16) {
        if self.writer.is_ended() {
            return;
        }
        let header = Header::window_update(pending | flags::FIN, self.id, 0);
        if let Err(err) = self.writer.send_header(&header) {
            debug!(stream_id = self.id, %err, "failed to send FIN");
        }
    }

    /// Apply the flags of an inbound frame.
    ///
    /// Returns whether the stream must be deregistered.
    fn process_flags(&self, inner: &mut StreamInner, frame_flags: u16) -> Result<bool> {
        let mut deregister = false;

        if flags::has_flag(frame_flags, flags::ACK) && inner.state == StreamState::SynSent {
            inner.state = StreamState::Established;
        }

        if flags::has_flag(frame_flags, flags::FIN) {
            match inner.state {
                StreamState::SynSent | StreamState::SynReceived | StreamState::Established => {
                    inner.state = StreamState::RemoteClose;
                }
                StreamState::LocalClose => {
                    inner.state = StreamState::Closed;
                    deregister = true;
                }
                state => {
                    error!(stream_id = self.id, ?state, "unexpected FIN flag");
                    return Err(MuxError::UnexpectedFlag);
                }
            }
            inner.wake_all();
        }

        if flags::has_flag(frame_flags, flags::RST) {
            inner.state = StreamState::Reset;
            deregister = true;
            inner.wake_all();
        }

        Ok(deregister)
    }

    /// Handle an inbound window update: flags first, then the credit.
    pub(crate) fn receive_window_update(&self, header: &Header) -> bool {
        let mut inner = self.inner.lock();

        let deregister = match self.process_flags(&mut inner, header.flags) {
            Ok(deregister) => deregister,
            Err(err) => {
                inner.fail(err);
                return false;
            }
        };

        if header.length > 0 {
            inner.send_window = inner.send_window.saturating_add(header.length);
            inner.parked_since = None;
        }
        inner.wake_writer();
        deregister
    }

    /// Handle an inbound data frame: flags first, then the payload.
    pub(crate) fn receive_data(&self, header: &Header, payload: Bytes) -> bool {
        let mut inner = self.inner.lock();

        let deregister = match self.process_flags(&mut inner, header.flags) {
            Ok(deregister) => deregister,
            Err(err) => {
                inner.fail(err);
                return false;
            }
        };

        if inner.state == StreamState::Reset {
            return deregister;
        }

        let len = payload.len();
        if len > 0 {
            if len > inner.recv_window as usize {
                warn!(
                    stream_id = self.id,
                    recv_window = inner.recv_window,
                    received = len,
                    "receive window exceeded"
                );
                inner.fail(MuxError::RecvWindowExceeded);
                return deregister;
            }
            inner.recv_buf.extend_from_slice(&payload);
            inner.recv_window -= len as u32;
        }

        if let Err(err) = self.send_window_update(&mut inner) {
            debug!(stream_id = self.id, %err, "failed to send window update");
        }
        inner.wake_reader();
        deregister
    }

    /// Local close.
    ///
    /// Returns whether the stream must be deregistered.
    pub(crate) fn close(&self) -> Result<bool> {
        let mut inner = self.inner.lock();

        match inner.state {
            StreamState::Closed => return Err(MuxError::StreamClosed),
            StreamState::Reset => return Err(MuxError::ConnectionReset),
            StreamState::Init => {
                inner.state = StreamState::Closed;
                inner.wake_all();
                return Ok(true);
            }
            _ => {}
        }

        // A second close (or a close after the remote's FIN) finishes the stream.
        let deregister = matches!(
            inner.state,
            StreamState::LocalClose | StreamState::RemoteClose
        );

        let pending = inner.send_flags();
        inner.state = StreamState::LocalClose;
        self.send_close(pending);
        inner.wake_all();
        Ok(deregister)
    }

    /// The handle went away: finish our direction if still open.
    ///
    /// The caller removes the stream from the table afterwards.
    pub(crate) fn release(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            StreamState::SynSent
            | StreamState::SynReceived
            | StreamState::Established
            | StreamState::RemoteClose => {
                let pending = inner.send_flags();
                self.send_close(pending);
            }
            StreamState::Init
            | StreamState::LocalClose
            | StreamState::Closed
            | StreamState::Reset => {}
        }

        if inner.state != StreamState::Reset {
            inner.state = StreamState::Closed;
        }
        inner.wake_all();
    }

    /// Session teardown: no frame is sent.
    pub(crate) fn force_close(&self) {
        let mut inner = self.inner.lock();
        inner.state = StreamState::Closed;
        inner.wake_all();
    }

    fn poll_read_buf(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<Result<()>> {
        let mut inner = self.inner.lock();

        if let Some(err) = inner.error.take() {
            return Poll::Ready(Err(err));
        }

        if !inner.recv_buf.is_empty() {
            let n = buf.remaining().min(inner.recv_buf.len());
            let chunk = inner.recv_buf.split_to(n);
            buf.put_slice(&chunk);

            if let Err(err) = self.send_window_update(&mut inner) {
                debug!(stream_id = self.id, %err, "failed to send window update");
            }
            return Poll::Ready(Ok(()));
        }

        match inner.state {
            // End of stream.
            StreamState::RemoteClose | StreamState::Closed => Poll::Ready(Ok(())),
            StreamState::Reset => Poll::Ready(Err(MuxError::ConnectionReset)),
            _ => {
                inner.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    /// Send at most one Data frame, sized to the current send window.
    fn poll_write_buf(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
        let mut inner = self.inner.lock();

        if let Some(err) = inner.error.take() {
            return Poll::Ready(Err(err));
        }

        match inner.state {
            StreamState::LocalClose | StreamState::RemoteClose | StreamState::Closed => {
                return Poll::Ready(Err(MuxError::StreamClosed));
            }
            StreamState::Reset => return Poll::Ready(Err(MuxError::ConnectionReset)),
            _ => {}
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if inner.send_window == 0 {
            self.park_writer(&mut inner, cx.waker());
            return Poll::Pending;
        }

        let n = (inner.send_window as usize).min(buf.len());
        let flags = inner.send_flags();
        let header = Header::data(flags, self.id, n as u32);
        self.writer
            .send(OutboundFrame::new(&header, Bytes::copy_from_slice(&buf[..n])))?;

        inner.send_window -= n as u32;
        inner.parked_since = None;
        Poll::Ready(Ok(n))
    }

    /// Register the waiting writer and start its write timeout.
    ///
    /// The clock keeps running across polls of the same waiter, and across
    /// wakeups that grant no credit. It restarts for a different waiter, and
    /// when the previous one stopped polling long ago (a write that was
    /// abandoned while blocked).
    fn park_writer(&self, inner: &mut StreamInner, waker: &Waker) {
        let now = Instant::now();

        let same_waiter = inner
            .write_waker
            .as_ref()
            .map_or(true, |parked| parked.will_wake(waker));
        let abandoned = inner
            .parked_since
            .map_or(true, |since| now >= since + self.write_timeout * 2);

        if !same_waiter || abandoned {
            inner.parked_since = Some(now);
        }
        inner.write_waker = Some(waker.clone());
    }

    /// When the parked writer times out, if one is parked.
    fn write_deadline(&self) -> Option<Instant> {
        self.inner
            .lock()
            .parked_since
            .map(|since| since + self.write_timeout)
    }

    fn clear_write_deadline(&self) {
        self.inner.lock().parked_since = None;
    }
}

/// A logical byte stream multiplexed over a session.
///
/// Writes are split into Data frames no larger than the remote's window
/// and park while the window is exhausted; a write parked for longer than
/// the session's `connection_write_timeout` fails. Reads drain buffered
/// bytes and report end-of-stream once the remote has closed its side.
///
/// Dropping the handle closes our direction (FIN) if it is still open and
/// removes the stream from the session.
pub struct Stream {
    shared: Arc<StreamShared>,
    session: Arc<SessionShared>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl Stream {
    pub(crate) fn new(shared: Arc<StreamShared>, session: Arc<SessionShared>) -> Self {
        Self {
            shared,
            session,
            write_deadline: None,
        }
    }

    /// The stream ID.
    #[inline]
    pub fn id(&self) -> u32 {
        self.shared.id()
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.shared.inner.lock().state
    }

    /// Bytes the remote may still send before it needs a window update.
    pub fn recv_window(&self) -> u32 {
        self.shared.inner.lock().recv_window
    }

    /// Bytes we may still send before the remote grants more.
    pub fn send_window(&self) -> u32 {
        self.shared.inner.lock().send_window
    }

    /// Received bytes not read yet.
    pub fn buffered_len(&self) -> usize {
        self.shared.inner.lock().recv_buf.len()
    }

    #[cfg(test)]
    pub(crate) fn shared_for_test(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    /// Close our direction of the stream (sends FIN).
    ///
    /// Closing again, or closing after the remote's FIN, re-sends FIN and
    /// releases the stream.
    pub fn close(&self) -> Result<()> {
        if self.shared.close()? {
            self.session.remove_stream(self.id());
        }
        Ok(())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shared.release();
        self.session.remove_stream(self.id());
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.shared.poll_read_buf(cx, buf).map_err(io::Error::from)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        match this.shared.poll_write_buf(cx, buf) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result.map_err(io::Error::from))
            }
            Poll::Pending => {
                // Credit may have arrived in between; its wakeup re-polls us.
                let Some(deadline) = this.shared.write_deadline() else {
                    return Poll::Pending;
                };

                let sleep = this
                    .write_deadline
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
                if sleep.deadline() != deadline {
                    sleep.as_mut().reset(deadline);
                }

                if sleep.as_mut().poll(cx).is_ready() {
                    this.write_deadline = None;
                    this.shared.clear_write_deadline();
                    return Poll::Ready(Err(MuxError::ConnectionWriteTimeout.into()));
                }
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Frames are handed to the writer task as soon as they are built.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.close().map_err(io::Error::from))
    }
}
