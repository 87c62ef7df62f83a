//! Asynchronous TCP/UDP socket with a buffer-windowed receive path.
//!
//! A [`TransportSocket`] owns one OS socket. Receiving runs on a dedicated
//! task that owns the [`RecvWindow`] and the [`ReceiveHandler`]; sending runs
//! on a drain task that exists only while the send queue is non-empty. Both
//! loops arm their next operation only after the previous one finished, so at
//! most one receive and one send are ever outstanding per socket.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::config::TransportConfig;
use crate::error::{DisconnectReason, Result, TransportError};
use crate::events::{SubscriptionId, Subscribers};
use crate::receive::{deliver, DeliveryOutcome, ReceiveControl, ReceiveHandler};
use crate::send::{SendEntry, SendQueue, SendTag};
use crate::window::RecvWindow;

/// Socket protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn is_stream(self) -> bool {
        matches!(self, Protocol::Tcp)
    }
}

impl FromStr for Protocol {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(TransportError::ProtocolUnsupported(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Lifecycle of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Bound stream socket that has not connected yet
    Idle,
    /// Asynchronous connect in progress
    Connecting,
    /// Able to send and receive
    Connected,
    /// `close()` has started tearing the socket down
    Closing,
    /// Torn down; permanently inert
    Closed,
}

/// Notifications published by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The asynchronous connect completed
    Connected { peer: SocketAddr },
    /// The asynchronous connect failed
    ConnectFailed { error: String },
    /// A queued send was fully written
    SendReady { tag: Option<SendTag>, bytes: usize },
    /// The socket went down; fired exactly once
    Disconnected(DisconnectReason),
}

/// Byte counters for one socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub sends_completed: u64,
    pub queued_sends: usize,
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

enum ReadHalf {
    Stream(BoxedReader),
    Datagram(Arc<UdpSocket>),
}

enum WriteHalf {
    Stream(BoxedWriter),
    Datagram(Arc<UdpSocket>),
}

impl WriteHalf {
    async fn write_entry(&mut self, entry: &SendEntry) -> std::io::Result<()> {
        match self {
            WriteHalf::Stream(writer) => {
                writer.write_all(entry.data()).await?;
                writer.flush().await
            }
            WriteHalf::Datagram(socket) => {
                match entry.destination() {
                    Some(dest) => socket.send_to(entry.data(), dest).await?,
                    None => socket.send(entry.data()).await?,
                };
                Ok(())
            }
        }
    }
}

/// Halves and handler waiting for the socket to become connected.
struct IoSlots {
    unbound: Option<TcpSocket>,
    reader: Option<ReadHalf>,
    handler: Option<Box<dyn ReceiveHandler + Send>>,
    receiving: bool,
}

struct Inner {
    protocol: Protocol,
    config: TransportConfig,
    local_addr: Option<SocketAddr>,
    peer_addr: Mutex<Option<SocketAddr>>,
    state: Mutex<SocketState>,
    io: Mutex<IoSlots>,
    sends: Mutex<SendQueue<WriteHalf>>,
    control: ReceiveControl,
    tasks: Mutex<Vec<AbortHandle>>,
    bytes_received: AtomicU64,
    events: Subscribers<TransportEvent>,
}

/// One OS socket with windowed, event-driven I/O.
///
/// Cloning yields another handle to the same socket.
///
/// # Example
///
/// ```no_run
/// use upnp_transport::{Delivery, Flow, SendEntry, TransportConfig, TransportSocket};
/// use tokio::net::TcpStream;
///
/// #[tokio::main]
/// async fn main() -> upnp_transport::Result<()> {
///     let stream = TcpStream::connect("192.168.1.20:1400").await?;
///     let socket = TransportSocket::adopt_tcp(stream, TransportConfig::default())?;
///
///     socket.begin_receiving(|delivery: Delivery<'_>| {
///         println!("{} bytes buffered", delivery.data.len());
///         Flow::Continue { consumed: delivery.data.len(), wanted: 4096 }
///     })?;
///     socket.send(SendEntry::new(&b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"[..]))?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TransportSocket {
    inner: Arc<Inner>,
}

impl TransportSocket {
    fn from_parts(
        protocol: Protocol,
        config: TransportConfig,
        state: SocketState,
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
        unbound: Option<TcpSocket>,
        halves: Option<(ReadHalf, WriteHalf)>,
    ) -> Self {
        let (reader, writer) = match halves {
            Some((r, w)) => (Some(r), Some(w)),
            None => (None, None),
        };
        let mut sends = SendQueue::new();
        sends.writer = writer;

        Self {
            inner: Arc::new(Inner {
                protocol,
                config,
                local_addr,
                peer_addr: Mutex::new(peer_addr),
                state: Mutex::new(state),
                io: Mutex::new(IoSlots {
                    unbound,
                    reader,
                    handler: None,
                    receiving: false,
                }),
                sends: Mutex::new(sends),
                control: ReceiveControl::new(),
                tasks: Mutex::new(Vec::new()),
                bytes_received: AtomicU64::new(0),
                events: Subscribers::new(),
            }),
        }
    }

    /// Bind a new socket to `local`.
    ///
    /// TCP sockets start [`Idle`](SocketState::Idle) and must be connected
    /// with [`connect`](Self::connect); UDP sockets are usable immediately.
    pub async fn attach(
        local: SocketAddr,
        protocol: Protocol,
        config: TransportConfig,
    ) -> Result<Self> {
        config.validate()?;
        match protocol {
            Protocol::Tcp => {
                let socket = if local.is_ipv4() {
                    TcpSocket::new_v4()?
                } else {
                    TcpSocket::new_v6()?
                };
                socket.set_reuseaddr(true)?;
                socket.bind(local)?;
                let local_addr = socket.local_addr().ok();
                tracing::debug!("Attached tcp socket at {:?}", local_addr);
                Ok(Self::from_parts(
                    protocol,
                    config,
                    SocketState::Idle,
                    local_addr,
                    None,
                    Some(socket),
                    None,
                ))
            }
            Protocol::Udp => {
                let socket = UdpSocket::bind(local).await?;
                tracing::debug!("Attached udp socket at {:?}", socket.local_addr().ok());
                Ok(Self::adopt_udp(socket, config))
            }
        }
    }

    /// Adopt an already connected TCP stream.
    pub fn adopt_tcp(stream: TcpStream, config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        let (r, w) = stream.into_split();
        Ok(Self::from_parts(
            Protocol::Tcp,
            config,
            SocketState::Connected,
            local_addr,
            peer_addr,
            None,
            Some((ReadHalf::Stream(Box::new(r)), WriteHalf::Stream(Box::new(w)))),
        ))
    }

    /// Adopt any connected byte stream, such as one end of `tokio::io::duplex`.
    pub fn adopt_stream<S>(stream: S, peer: Option<SocketAddr>, config: TransportConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let (r, w) = tokio::io::split(stream);
        Ok(Self::from_parts(
            Protocol::Tcp,
            config,
            SocketState::Connected,
            None,
            peer,
            None,
            Some((ReadHalf::Stream(Box::new(r)), WriteHalf::Stream(Box::new(w)))),
        ))
    }

    /// Adopt a bound UDP socket.
    pub fn adopt_udp(socket: UdpSocket, config: TransportConfig) -> Self {
        let local_addr = socket.local_addr().ok();
        let peer_addr = socket.peer_addr().ok();
        let socket = Arc::new(socket);
        Self::from_parts(
            Protocol::Udp,
            config,
            SocketState::Connected,
            local_addr,
            peer_addr,
            None,
            Some((
                ReadHalf::Datagram(socket.clone()),
                WriteHalf::Datagram(socket),
            )),
        )
    }

    pub fn protocol(&self) -> Protocol {
        self.inner.protocol
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SocketState {
        *self.inner.state.lock()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.inner.peer_addr.lock()
    }

    pub fn stats(&self) -> TransportStats {
        let sends = self.inner.sends.lock();
        TransportStats {
            bytes_sent: sends.bytes_sent,
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
            sends_completed: sends.sends_completed,
            queued_sends: sends.entries.len(),
        }
    }

    /// Register an event callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.inner.events.register(callback)
    }

    /// Register a channel subscriber.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<TransportEvent>) {
        self.inner.events.channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unregister(id)
    }

    /// Start an asynchronous connect. The outcome is published as
    /// [`TransportEvent::Connected`] or [`TransportEvent::ConnectFailed`].
    pub fn connect(&self, remote: SocketAddr) -> Result<()> {
        if !self.inner.protocol.is_stream() {
            return Err(TransportError::NotStream);
        }

        let socket = {
            let mut state = self.inner.state.lock();
            if *state != SocketState::Idle {
                return Err(TransportError::InvalidState {
                    operation: "connect",
                    state: *state,
                });
            }
            let socket = self.inner.io.lock().unbound.take().ok_or(
                TransportError::InvalidState {
                    operation: "connect",
                    state: *state,
                },
            )?;
            *state = SocketState::Connecting;
            socket
        };

        tracing::debug!("Connecting to {}", remote);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            match socket.connect(remote).await {
                Ok(stream) => Inner::on_connected(&inner, stream),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", remote, e);
                    inner.events.emit(&TransportEvent::ConnectFailed {
                        error: e.to_string(),
                    });
                    inner.disconnect(DisconnectReason::ConnectFailed(e.to_string()));
                }
            }
        });
        self.inner.track(handle.abort_handle());
        Ok(())
    }

    /// Install the receive handler and arm the first read.
    ///
    /// On a socket that is still connecting, receiving starts as soon as the
    /// connect completes.
    pub fn begin_receiving<H>(&self, handler: H) -> Result<()>
    where
        H: ReceiveHandler + Send + 'static,
    {
        let state = self.state();
        if matches!(state, SocketState::Closing | SocketState::Closed) {
            return Err(TransportError::InvalidState {
                operation: "begin_receiving",
                state,
            });
        }

        let mut io = self.inner.io.lock();
        if io.receiving || io.handler.is_some() {
            return Err(TransportError::InvalidState {
                operation: "begin_receiving",
                state,
            });
        }

        match io.reader.take() {
            Some(reader) => {
                io.receiving = true;
                drop(io);
                Inner::spawn_receive(&self.inner, reader, Box::new(handler));
            }
            None => io.handler = Some(Box::new(handler)),
        }
        Ok(())
    }

    /// Queue `entry` for sending.
    ///
    /// Entries are written strictly in the order they were queued and never
    /// overlap. Each completion is published as [`TransportEvent::SendReady`].
    pub fn send(&self, entry: SendEntry) -> Result<()> {
        let state = self.state();
        if matches!(state, SocketState::Closing | SocketState::Closed) {
            return Err(TransportError::InvalidState {
                operation: "send",
                state,
            });
        }

        let writer = {
            let mut sends = self.inner.sends.lock();
            let writer = sends.push(entry);
            if sends.entries.len() > self.inner.config.send_queue_warn_len {
                tracing::warn!(
                    "Send queue holds {} entries; peer is not keeping up",
                    sends.entries.len()
                );
            }
            writer
        };

        if let Some(writer) = writer {
            Inner::spawn_drain(&self.inner, writer);
        }
        Ok(())
    }

    /// Queue `entry` and wait until it has been written.
    pub async fn send_and_wait(&self, entry: SendEntry) -> Result<()> {
        let (entry, done) = entry.with_completion();
        self.send(entry)?;
        match done.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Disconnected(DisconnectReason::Closed)),
        }
    }

    /// Pause delivery of buffered data. The socket stays open.
    pub fn stop_receiving(&self) {
        self.inner.control.stop();
    }

    /// Resume delivery after [`stop_receiving`](Self::stop_receiving) or a
    /// [`Flow::Stop`](crate::Flow::Stop).
    pub fn start_receiving(&self) {
        self.inner.control.start();
    }

    pub fn is_receiving_stopped(&self) -> bool {
        self.inner.control.is_stopped()
    }

    /// Shut the socket down. Idempotent; queued sends fail with
    /// [`TransportError::Disconnected`].
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            match *state {
                SocketState::Closing | SocketState::Closed => return,
                _ => *state = SocketState::Closing,
            }
        }
        self.inner.disconnect(DisconnectReason::Closed);
    }
}

impl fmt::Debug for TransportSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSocket")
            .field("protocol", &self.inner.protocol)
            .field("state", &self.state())
            .field("local_addr", &self.inner.local_addr)
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

impl Inner {
    fn track(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn on_connected(self: &Arc<Self>, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let (r, w) = stream.into_split();

        {
            let mut state = self.state.lock();
            if *state != SocketState::Connecting {
                // closed while the connect was in flight
                return;
            }
            *state = SocketState::Connected;
        }
        *self.peer_addr.lock() = peer;

        let writer = {
            let mut sends = self.sends.lock();
            sends.writer = Some(WriteHalf::Stream(Box::new(w)));
            sends.take_writer_if_idle()
        };
        if let Some(writer) = writer {
            Inner::spawn_drain(self, writer);
        }

        let mut reader = Some(ReadHalf::Stream(Box::new(r)));
        let handler = {
            let mut io = self.io.lock();
            match io.handler.take() {
                Some(handler) => {
                    io.receiving = true;
                    Some(handler)
                }
                None => {
                    io.reader = reader.take();
                    None
                }
            }
        };

        if let Some(peer) = peer {
            tracing::debug!("Connected to {}", peer);
            self.events.emit(&TransportEvent::Connected { peer });
        }

        if let (Some(handler), Some(reader)) = (handler, reader) {
            Inner::spawn_receive(self, reader, handler);
        }
    }

    fn spawn_receive(self: &Arc<Self>, reader: ReadHalf, handler: Box<dyn ReceiveHandler + Send>) {
        let inner = self.clone();
        let handle = tokio::spawn(receive_loop(inner, reader, handler));
        self.track(handle.abort_handle());
    }

    fn spawn_drain(self: &Arc<Self>, writer: WriteHalf) {
        let inner = self.clone();
        let handle = tokio::spawn(send_loop(inner, writer));
        self.track(handle.abort_handle());
    }

    /// Tear the socket down. Only the first call has any effect.
    fn disconnect(self: &Arc<Self>, reason: DisconnectReason) {
        {
            let mut state = self.state.lock();
            if *state == SocketState::Closed {
                return;
            }
            *state = SocketState::Closed;
        }

        if reason.is_error() {
            tracing::warn!("Socket {:?} disconnected: {}", self.local_addr, reason);
        } else {
            tracing::debug!("Socket {:?} disconnected: {}", self.local_addr, reason);
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let pending = self.sends.lock().drain_pending();
        for mut entry in pending {
            entry.fail(&reason);
        }

        {
            let mut io = self.io.lock();
            io.unbound = None;
            io.reader = None;
            io.handler = None;
        }
        self.control.start();

        self.events.emit(&TransportEvent::Disconnected(reason));
        self.events.clear();
    }
}

async fn receive_loop(
    inner: Arc<Inner>,
    mut reader: ReadHalf,
    mut handler: Box<dyn ReceiveHandler + Send>,
) {
    let mut window = RecvWindow::new(inner.config.buffer_capacity);
    window.request(
        handler
            .initial_read_size()
            .unwrap_or(inner.config.initial_read_size),
    );
    let mut from = None;

    loop {
        loop {
            if inner.control.is_stopped() {
                inner.control.wait_resumed().await;
            }
            match deliver(&mut window, handler.as_mut(), from, &inner.control) {
                DeliveryOutcome::NeedRead => break,
                DeliveryOutcome::Paused => continue,
                DeliveryOutcome::Abort(reason) => {
                    handler.on_end(&reason);
                    inner.disconnect(reason);
                    return;
                }
            }
        }

        let read = match &mut reader {
            ReadHalf::Stream(stream) => match stream.read(window.spare_mut()).await {
                Ok(0) => Err(DisconnectReason::PeerClosed),
                Ok(n) => Ok(n),
                Err(e) => Err(DisconnectReason::ReceiveFailed(e.to_string())),
            },
            ReadHalf::Datagram(socket) => {
                // each datagram stands alone
                let leftover = window.len();
                window.consume(leftover);
                window.compact();
                window.request(usize::MAX);
                match socket.recv_from(window.spare_mut()).await {
                    Ok((n, addr)) => {
                        from = Some(addr);
                        Ok(n)
                    }
                    Err(e) => Err(DisconnectReason::ReceiveFailed(e.to_string())),
                }
            }
        };

        match read {
            Ok(n) => {
                window.commit(n);
                inner.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                tracing::trace!(bytes = n, window = ?window, "raw read");
            }
            Err(reason) => {
                handler.on_end(&reason);
                inner.disconnect(reason);
                return;
            }
        }
    }
}

async fn send_loop(inner: Arc<Inner>, writer: WriteHalf) {
    let mut writer = Some(writer);
    loop {
        let next = inner.sends.lock().next_or_park(&mut writer);
        let Some(mut entry) = next else {
            return;
        };
        let Some(active) = writer.as_mut() else {
            return;
        };

        match active.write_entry(&entry).await {
            Ok(()) => {
                let bytes = entry.len();
                inner.sends.lock().record_sent(bytes);
                entry.complete();
                inner.events.emit(&TransportEvent::SendReady {
                    tag: entry.tag(),
                    bytes,
                });
            }
            Err(e) => {
                let reason = DisconnectReason::SendFailed(e.to_string());
                entry.fail(&reason);
                inner.disconnect(reason);
                return;
            }
        }
    }
}
