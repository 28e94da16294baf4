//! The session: one transport carrying many streams.
//!
//! A session runs three background tasks:
//!
//! ```text
//!              ┌──────────── read_loop ◄──── transport read half
//!              │  (demux: route frames to streams, answer pings,
//!              │   admit inbound SYNs, apply go-aways)
//!   SessionShared
//!              │
//!              ├──────────── writer task ───► transport write half
//!              │  (every outbound frame, FIFO)
//!              │
//!              └──────────── keepalive (optional, periodic pings)
//! ```
//!
//! Lock order is session state first, then a stream's inner state. The
//! stream table is only touched with no stream lock held.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::protocol::{flags, Frame, FrameBuffer, FrameType, GoAwayCode, Header};
use crate::stream::{Stream, StreamShared, StreamState};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Bytes requested from the transport per read.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Which end of the transport this session is.
///
/// Clients open odd stream IDs, servers even ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// The first stream ID this role opens.
    pub fn first_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }
}

/// Callback invoked for every admitted inbound stream.
pub type OnStream = Arc<dyn Fn(Stream) + Send + Sync>;

struct PendingPing {
    timer: JoinHandle<()>,
    ack: oneshot::Sender<()>,
}

struct SessionState {
    next_stream_id: u32,
    next_ping_id: u32,
    /// We sent a normal go-away: inbound SYNs are reset.
    local_go_away: bool,
    /// The remote sent a normal go-away: `open` is refused.
    remote_go_away: bool,
    shutdown: bool,
    close_reason: Option<MuxError>,
    streams: HashMap<u32, Arc<StreamShared>>,
    pings: HashMap<u32, PendingPing>,
    /// Reader, writer monitor and keepalive.
    tasks: Vec<JoinHandle<()>>,
}

impl SessionState {
    fn new(role: Role) -> Self {
        Self {
            next_stream_id: role.first_stream_id(),
            next_ping_id: 0,
            local_go_away: false,
            remote_go_away: false,
            shutdown: false,
            close_reason: None,
            streams: HashMap::new(),
            pings: HashMap::new(),
            tasks: Vec::new(),
        }
    }
}

/// Session state shared by the handle, the background tasks and the streams.
pub(crate) struct SessionShared {
    role: Role,
    pub(crate) config: Config,
    writer: WriterHandle,
    on_stream: Option<OnStream>,
    incoming_tx: mpsc::UnboundedSender<Stream>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Stream>>,
    shutdown_tx: watch::Sender<bool>,
    state: Mutex<SessionState>,
}

/// A multiplexed session over one transport.
///
/// Cheap to clone; all clones drive the same session. Dropping the handles
/// does not close the session, call [`close`](Self::close) for that.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Start a session over `transport`.
    ///
    /// Inbound streams are handed to `on_stream` when given, otherwise they
    /// queue up for [`accept`](Self::accept).
    ///
    /// Must be called within a tokio runtime.
    pub fn new<T>(
        transport: T,
        role: Role,
        config: Config,
        on_stream: Option<OnStream>,
    ) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.verify()?;

        let (read_half, write_half) = tokio::io::split(transport);
        let (writer, writer_task) = spawn_writer_task(write_half, config.connection_write_timeout);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(SessionShared {
            role,
            config,
            writer,
            on_stream,
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            shutdown_tx,
            state: Mutex::new(SessionState::new(role)),
        });

        let mut tasks = vec![
            tokio::spawn(read_loop(shared.clone(), read_half)),
            tokio::spawn(watch_writer(Arc::downgrade(&shared), writer_task)),
        ];
        if shared.config.enable_keep_alive {
            tasks.push(shared.spawn_keepalive());
        }

        {
            let mut state = shared.state.lock();
            if state.shutdown {
                tasks.iter().for_each(JoinHandle::abort);
            } else {
                state.tasks = tasks;
            }
        }

        debug!(?role, "session started");
        Ok(Self { shared })
    }

    /// Open a new outbound stream.
    ///
    /// The stream ID is consumed even when opening fails.
    pub fn open(&self) -> Result<Stream> {
        let stream = {
            let mut state = self.shared.state.lock();

            let id = state.next_stream_id;
            if id >= u32::MAX - 1 {
                return Err(MuxError::StreamsExhausted);
            }
            state.next_stream_id += 2;

            if state.remote_go_away {
                return Err(MuxError::RemoteGoAway);
            }
            if state.shutdown {
                return Err(MuxError::SessionShutdown);
            }

            let stream = Arc::new(StreamShared::new(
                id,
                StreamState::Init,
                self.shared.writer.clone(),
                self.shared.config.max_stream_window_size,
                self.shared.config.connection_write_timeout,
            ));
            state.streams.insert(id, stream.clone());
            stream
        };

        if let Err(err) = stream.open() {
            self.shared.remove_stream(stream.id());
            return Err(err);
        }

        debug!(stream_id = stream.id(), "stream opened");
        Ok(Stream::new(stream, self.shared.clone()))
    }

    /// Wait for the next inbound stream.
    ///
    /// Only yields streams when the session was created without an
    /// `on_stream` callback.
    pub async fn accept(&self) -> Result<Stream> {
        let mut shutdown = self.shared.shutdown_tx.subscribe();
        let mut incoming = self.shared.incoming_rx.lock().await;

        tokio::select! {
            biased;
            stream = incoming.recv() => stream.ok_or(MuxError::SessionShutdown),
            _ = shutdown.wait_for(|closed| *closed) => {
                Err(self.shared.close_reason().unwrap_or(MuxError::SessionShutdown))
            }
        }
    }

    /// Send a ping and wait for the reply.
    ///
    /// Returns the round-trip time. An unanswered ping closes the session
    /// after `connection_write_timeout`.
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let ack = self.shared.send_ping()?;

        ack.await
            .map_err(|_| self.shared.close_reason().unwrap_or(MuxError::SessionShutdown))?;

        Ok(start.elapsed())
    }

    /// Tell the remote to stop opening streams.
    ///
    /// Existing streams are unaffected.
    pub fn go_away(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return Err(MuxError::SessionShutdown);
            }
            state.local_go_away = true;
        }
        self.shared
            .writer
            .send_header(&Header::go_away(GoAwayCode::Normal))
    }

    /// Close the session.
    ///
    /// Sends a normal go-away, closes every stream and ends the transport's
    /// outbound side once queued frames are written. Idempotent.
    pub fn close(&self) {
        self.shared.close_with(None);
    }

    /// Wait until the session has shut down.
    ///
    /// Resolves to the error that closed it, if one did.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        let mut shutdown = self.shared.shutdown_tx.subscribe();
        let _ = shutdown.wait_for(|closed| *closed).await;

        match self.shared.close_reason() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Whether the session has shut down.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of streams in the stream table.
    pub fn num_streams(&self) -> usize {
        self.shared.state.lock().streams.len()
    }

    /// Frames queued for the writer task.
    pub fn pending_frames(&self) -> usize {
        self.shared.writer.pending_count()
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.shared.role)
            .field("closed", &self.is_closed())
            .field("streams", &self.num_streams())
            .finish()
    }
}

impl SessionShared {
    pub(crate) fn remove_stream(&self, id: u32) {
        if self.state.lock().streams.remove(&id).is_some() {
            debug!(stream_id = id, "stream released");
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().shutdown
    }

    fn close_reason(&self) -> Option<MuxError> {
        self.state.lock().close_reason.clone()
    }

    /// Queue a header-only frame, dropping it if the session has ended.
    fn send_control(&self, header: Header) {
        if let Err(err) = self.writer.send_header(&header) {
            debug!(frame_type = ?header.kind(), %err, "dropping control frame");
        }
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) {
        match frame.kind() {
            Some(FrameType::Data) | Some(FrameType::WindowUpdate) => self.handle_stream_frame(frame),
            Some(FrameType::Ping) => self.handle_ping(&frame.header),
            Some(FrameType::GoAway) => self.handle_go_away(&frame.header),
            None => self.close_with(Some(MuxError::InvalidMessageType(frame.header.frame_type))),
        }
    }

    fn handle_stream_frame(self: &Arc<Self>, frame: Frame) {
        let header = frame.header;
        let id = header.stream_id;

        if frame.is_syn() && !self.incoming_stream(id) {
            return;
        }

        let stream = self.state.lock().streams.get(&id).cloned();
        let Some(stream) = stream else {
            warn!(stream_id = id, frame_type = ?header.kind(), "frame for unknown stream");
            return;
        };

        let deregister = match header.kind() {
            Some(FrameType::WindowUpdate) => stream.receive_window_update(&header),
            _ => stream.receive_data(&header, frame.payload),
        };

        if deregister {
            self.remove_stream(id);
        }
    }

    /// Admit a stream the remote opened.
    ///
    /// Returns whether the stream was registered.
    fn incoming_stream(self: &Arc<Self>, id: u32) -> bool {
        let stream = {
            let mut state = self.state.lock();

            if state.shutdown {
                return false;
            }

            if state.local_go_away {
                drop(state);
                debug!(stream_id = id, "rejecting stream after go away");
                self.send_control(Header::window_update(flags::RST, id, 0));
                return false;
            }

            if state.streams.contains_key(&id) {
                drop(state);
                error!(stream_id = id, "duplicate stream declared");
                self.close_with(Some(MuxError::DuplicateStream));
                return false;
            }

            let stream = Arc::new(StreamShared::new(
                id,
                StreamState::SynReceived,
                self.writer.clone(),
                self.config.max_stream_window_size,
                self.config.connection_write_timeout,
            ));
            state.streams.insert(id, stream.clone());

            if state.streams.len() > self.config.accept_backlog {
                state.streams.remove(&id);
                drop(state);
                warn!(
                    stream_id = id,
                    backlog = self.config.accept_backlog,
                    "backlog exceeded, resetting stream"
                );
                self.send_control(Header::window_update(flags::RST, id, 0));
                return false;
            }

            stream
        };

        debug!(stream_id = id, "stream accepted");
        let stream = Stream::new(stream, self.clone());
        match &self.on_stream {
            Some(on_stream) => on_stream(stream),
            None => {
                let _ = self.incoming_tx.send(stream);
            }
        }
        true
    }

    /// Send a ping and register its reply waiter and timeout.
    fn send_ping(self: &Arc<Self>) -> Result<oneshot::Receiver<()>> {
        let (ack, rx) = oneshot::channel();

        let ping_id = {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(MuxError::SessionShutdown);
            }

            let ping_id = state.next_ping_id;
            state.next_ping_id = ping_id.wrapping_add(1);

            let session = Arc::downgrade(self);
            let timeout = self.config.connection_write_timeout;
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(session) = session.upgrade() {
                    error!(ping_id, "ping not answered in time");
                    session.close_with(Some(MuxError::KeepAliveTimeout));
                }
            });

            state.pings.insert(ping_id, PendingPing { timer, ack });
            ping_id
        };

        self.writer.send_header(&Header::ping(flags::SYN, ping_id))?;
        Ok(rx)
    }

    fn handle_ping(&self, header: &Header) {
        let ping_id = header.length;

        if header.has_flag(flags::SYN) {
            self.send_control(Header::ping(flags::ACK, ping_id));
            return;
        }

        if header.has_flag(flags::ACK) {
            let pending = self.state.lock().pings.remove(&ping_id);
            if let Some(pending) = pending {
                pending.timer.abort();
                let _ = pending.ack.send(());
            }
        }
    }

    fn handle_go_away(&self, header: &Header) {
        let code = header.length;
        match GoAwayCode::from_u32(code) {
            Some(GoAwayCode::Normal) => {
                debug!("remote sent go away");
                self.state.lock().remote_go_away = true;
            }
            Some(GoAwayCode::ProtocolError) => {
                error!("received protocol error go away");
                self.close_with(Some(MuxError::RemoteProtocolError));
            }
            Some(GoAwayCode::InternalError) => {
                error!("received internal error go away");
                self.close_with(Some(MuxError::RemoteInternalError));
            }
            None => {
                error!(code, "received unexpected go away");
                self.close_with(Some(MuxError::UnexpectedGoAway(code)));
            }
        }
    }

    fn spawn_keepalive(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        let period = self.config.keep_alive_interval;

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(shared) = session.upgrade() else {
                    break;
                };
                if let Err(err) = shared.send_ping() {
                    debug!(%err, "keepalive stopped");
                    break;
                }
            }
        })
    }

    /// Shut the session down, once.
    ///
    /// `reason` is `None` for an orderly close; otherwise the go-away code
    /// follows from the error and `wait_for_shutdown` reports it.
    pub(crate) fn close_with(&self, reason: Option<MuxError>) {
        let (streams, tasks) = {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }

            let code = reason
                .as_ref()
                .map_or(GoAwayCode::Normal, MuxError::go_away_code);
            self.send_control(Header::go_away(code));

            for (_, ping) in state.pings.drain() {
                ping.timer.abort();
            }

            state.shutdown = true;
            state.close_reason = reason.clone();

            let streams: Vec<_> = state.streams.drain().map(|(_, stream)| stream).collect();
            (streams, std::mem::take(&mut state.tasks))
        };

        match &reason {
            Some(err) => error!(role = ?self.role, %err, "session closed"),
            None => debug!(role = ?self.role, "session closed"),
        }

        for stream in streams {
            stream.force_close();
        }

        self.writer.finish();
        self.shutdown_tx.send_replace(true);

        for task in tasks {
            task.abort();
        }
    }
}

/// Demultiplex inbound frames until the transport ends or the session closes.
async fn read_loop<R>(session: Arc<SessionShared>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::new().with_max_payload(session.config.max_stream_window_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("transport closed by remote");
                session.close_with(None);
                return;
            }
            Ok(n) => n,
            Err(err) => {
                if !session.is_closed() {
                    error!(%err, "transport read failed");
                }
                session.close_with(Some(err.into()));
                return;
            }
        };

        frames.extend(&buf[..n]);

        loop {
            match frames.next_frame() {
                Ok(Some(frame)) => session.handle_frame(frame),
                Ok(None) => break,
                Err(err) => {
                    error!(%err, "invalid frame header");
                    session.close_with(Some(err));
                    return;
                }
            }

            if session.is_closed() {
                return;
            }
        }
    }
}

/// Close the session if the writer task fails.
async fn watch_writer(session: Weak<SessionShared>, task: JoinHandle<Result<()>>) {
    if let Ok(Err(err)) = task.await {
        if let Some(session) = session.upgrade() {
            error!(%err, "transport write failed");
            session.close_with(Some(err));
        }
    }
}
