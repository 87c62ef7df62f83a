//! HTTP connection on top of a transport socket.
//!
//! The receive side is a handler installed as the socket's
//! receive handler. It owns the [`MessageParser`] and turns parse events
//! into [`HttpEvent`]s. The send side is a FIFO of jobs (whole messages and
//! streamed bodies) drained by a pump task that exists only while the queue
//! is non-empty. Each frame waits for the previous write to complete, so one
//! job is on the wire at a time and a stream is paced by the socket.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use upnp_transport::{
    Delivery, DisconnectReason, Flow, ReceiveHandler, SendEntry, SocketState, SubscriptionId,
    Subscribers, TransportEvent, TransportSocket,
};

use crate::config::HttpConfig;
use crate::error::{HttpError, Result};
use crate::message::HttpMessage;
use crate::parser::{BodySink, MessageParser, ParseEvent, ParserLimits, RequestLog};
use crate::range::ByteRange;
use crate::stream::{JobId, PeerRequest, StreamOutcome, StreamSendJob, StreamSource};

/// Notifications published by an [`HttpConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpEvent {
    /// A message head was parsed; its body, if any, follows
    HeadersReceived(HttpMessage),
    /// A whole message was received
    MessageReceived(HttpMessage),
    /// The connection is gone; fired once
    ConnectionClosed(DisconnectReason),
    /// A streamed body finished
    StreamDone { job: JobId, outcome: StreamOutcome },
    /// Bytes consumed by the parser (diagnostics)
    RawReceived(Bytes),
    /// Bytes written to the socket (diagnostics)
    RawSent(Bytes),
    /// A parsed message (diagnostics)
    PacketParsed(HttpMessage),
    /// The head of a message that was written (diagnostics)
    PacketSent(HttpMessage),
}

/// Chooses a body sink for an incoming message from its head. Returning
/// `None` buffers the body in memory.
pub type SinkProvider = Arc<dyn Fn(&HttpMessage) -> Option<Box<dyn BodySink>> + Send + Sync>;

enum Work {
    Message(HttpMessage),
    Stream(StreamSendJob),
}

struct QueuedJob {
    id: JobId,
    work: Work,
}

struct ActiveJob {
    id: JobId,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct JobQueue {
    pending: VecDeque<QueuedJob>,
    active: Option<ActiveJob>,
    pumping: bool,
}

struct ConnInner {
    socket: TransportSocket,
    config: HttpConfig,
    events: Subscribers<HttpEvent>,
    jobs: Mutex<JobQueue>,
    next_job: AtomicU64,
    requests: RequestLog,
    last_request: Mutex<Option<PeerRequest>>,
    close_after_response: AtomicBool,
    sink_provider: Mutex<Option<SinkProvider>>,
    closed: AtomicBool,
}

/// One HTTP/1.x connection.
///
/// Cloning yields another handle to the same connection.
///
/// # Example
///
/// ```no_run
/// use std::io::Cursor;
/// use upnp_http::{HttpConfig, HttpConnection, HttpEvent};
/// use upnp_transport::{TransportConfig, TransportListener};
///
/// #[tokio::main]
/// async fn main() -> upnp_http::Result<()> {
///     let listener =
///         TransportListener::bind("0.0.0.0:8200".parse().unwrap(), TransportConfig::default()).await?;
///     let conn = HttpConnection::new(listener.accept().await?, HttpConfig::default())?;
///     let (_, mut events) = conn.subscribe_channel();
///     conn.begin_receiving()?;
///
///     while let Some(event) = events.recv().await {
///         if let HttpEvent::MessageReceived(request) = event {
///             let ranges = upnp_http::requested_ranges(&request).ok().flatten();
///             conn.send_streamed_body(Cursor::new(vec![0u8; 10_000]), ranges, "audio/mpeg")?;
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct HttpConnection {
    inner: Arc<ConnInner>,
}

impl HttpConnection {
    /// Wrap a connected socket. Call [`begin_receiving`](Self::begin_receiving)
    /// once subscribers are in place.
    pub fn new(socket: TransportSocket, config: HttpConfig) -> Result<Self> {
        config.validate()?;
        if matches!(socket.state(), SocketState::Closing | SocketState::Closed) {
            return Err(HttpError::Closed);
        }

        let inner = Arc::new(ConnInner {
            socket,
            config,
            events: Subscribers::new(),
            jobs: Mutex::new(JobQueue::default()),
            next_job: AtomicU64::new(1),
            requests: RequestLog::new(),
            last_request: Mutex::new(None),
            close_after_response: AtomicBool::new(false),
            sink_provider: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<ConnInner> = Arc::downgrade(&inner);
        inner.socket.subscribe(move |event| {
            if let TransportEvent::Disconnected(reason) = event {
                if let Some(inner) = weak.upgrade() {
                    inner.on_disconnect(reason.clone());
                }
            }
        });

        Ok(Self { inner })
    }

    /// Open a TCP connection to `remote`.
    pub async fn connect(remote: SocketAddr, config: HttpConfig) -> Result<Self> {
        let stream = TcpStream::connect(remote).await?;
        let socket = TransportSocket::adopt_tcp(stream, config.transport.clone())?;
        tracing::debug!("HTTP connection to {}", remote);
        Self::new(socket, config)
    }

    pub fn socket(&self) -> &TransportSocket {
        &self.inner.socket
    }

    pub fn config(&self) -> &HttpConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Register an event callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&HttpEvent) + Send + Sync + 'static,
    {
        self.inner.events.register(callback)
    }

    /// Register a channel subscriber.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<HttpEvent>) {
        self.inner.events.channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unregister(id)
    }

    /// Install the provider consulted for every incoming message with a body.
    pub fn set_body_sink_provider<F>(&self, provider: F)
    where
        F: Fn(&HttpMessage) -> Option<Box<dyn BodySink>> + Send + Sync + 'static,
    {
        *self.inner.sink_provider.lock() = Some(Arc::new(provider));
    }

    /// Start parsing incoming messages.
    pub fn begin_receiving(&self) -> Result<()> {
        let limits = ParserLimits::from(&self.inner.config);
        let receiver = HttpReceiver {
            parser: MessageParser::with_request_log(limits, self.inner.requests.clone()),
            conn: self.inner.clone(),
            pending: Vec::new(),
        };
        self.inner.socket.begin_receiving(receiver)?;
        Ok(())
    }

    /// Queue a whole message. Requests are recorded so that the matching
    /// response to a `HEAD` is parsed without a body.
    pub fn send_message(&self, message: HttpMessage) -> Result<JobId> {
        self.inner.enqueue(Work::Message(message))
    }

    /// Queue `source` as the response to the most recent request, with an
    /// automatic `200`, `206` or `416` head.
    pub fn send_streamed_body<S>(
        &self,
        source: S,
        ranges: Option<Vec<ByteRange>>,
        content_type: &str,
    ) -> Result<JobId>
    where
        S: StreamSource + 'static,
    {
        let job = StreamSendJob::new(source, content_type).with_ranges(ranges);
        self.send_stream(job)
    }

    /// Queue `head` followed by all of `source` as its body.
    pub fn send_streamed_message<S>(&self, head: HttpMessage, source: S) -> Result<JobId>
    where
        S: StreamSource + 'static,
    {
        let content_type = head.headers.get("Content-Type").unwrap_or("").to_string();
        self.send_stream(StreamSendJob::new(source, content_type).with_head(head))
    }

    /// Queue a prepared job description.
    pub fn send_stream(&self, mut job: StreamSendJob) -> Result<JobId> {
        if !job.has_peer() {
            if let Some(peer) = self.inner.last_request.lock().clone() {
                job = job.answering(peer);
            }
        }
        self.inner.enqueue(Work::Stream(job))
    }

    /// Stop a stream job.
    ///
    /// A queued job is dropped. The active job stops before its next slice:
    /// a chunked body is terminated early and the connection stays usable,
    /// a `Content-Length` body cannot be cut short, so the connection is
    /// closed. Returns `false` if no such stream job exists.
    pub fn close_stream(&self, job: JobId) -> bool {
        let mut jobs = self.inner.jobs.lock();
        let queued = jobs
            .pending
            .iter()
            .position(|j| j.id == job && matches!(j.work, Work::Stream(_)));
        if let Some(index) = queued {
            jobs.pending.remove(index);
            drop(jobs);
            tracing::debug!("Dropped queued stream job {}", job);
            self.inner.events.emit(&HttpEvent::StreamDone {
                job,
                outcome: StreamOutcome::Cancelled,
            });
            return true;
        }

        match &jobs.active {
            Some(active) if active.id == job => {
                active.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Pause delivery of received data. The connection stays open.
    pub fn stop_receiving(&self) {
        self.inner.socket.stop_receiving();
    }

    pub fn start_receiving(&self) {
        self.inner.socket.start_receiving();
    }

    /// Close the connection. Queued jobs are reported as disconnected.
    pub fn close(&self) {
        self.inner.socket.close();
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("socket", &self.inner.socket)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnInner {
    fn diagnostics(&self) -> bool {
        self.config.diagnostics
    }

    fn enqueue(self: &Arc<Self>, work: Work) -> Result<JobId> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HttpError::Closed);
        }

        let id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let start_pump = {
            let mut jobs = self.jobs.lock();
            jobs.pending.push_back(QueuedJob { id, work });
            !std::mem::replace(&mut jobs.pumping, true)
        };

        if start_pump {
            tokio::spawn(pump(self.clone()));
        }
        Ok(id)
    }

    fn note_request(&self, request: &HttpMessage) {
        let peer = PeerRequest::from_request(request);
        if !peer.keep_alive {
            self.close_after_response.store(true, Ordering::SeqCst);
        }
        *self.last_request.lock() = Some(peer);
    }

    fn sink_for(&self, head: &HttpMessage) -> Option<Box<dyn BodySink>> {
        let provider = self.sink_provider.lock().clone()?;
        provider(head)
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let dropped: Vec<QueuedJob> = self.jobs.lock().pending.drain(..).collect();
        for job in dropped {
            if let Work::Stream(_) = job.work {
                self.events.emit(&HttpEvent::StreamDone {
                    job: job.id,
                    outcome: StreamOutcome::Disconnected,
                });
            }
        }

        tracing::debug!("HTTP connection closed: {}", reason);
        self.events.emit(&HttpEvent::ConnectionClosed(reason));
    }

    async fn write(&self, job: JobId, frame: Bytes) -> bool {
        let entry = SendEntry::new(frame.clone()).tagged(job);
        match self.socket.send_and_wait(entry).await {
            Ok(()) => {
                if self.diagnostics() {
                    self.events.emit(&HttpEvent::RawSent(frame));
                }
                true
            }
            Err(e) => {
                tracing::debug!("Write for job {} failed: {}", job, e);
                false
            }
        }
    }

    /// Close after a response when either side asked for it.
    fn finish_response(&self, closes: bool) {
        if closes || self.close_after_response.load(Ordering::SeqCst) {
            tracing::debug!("Closing connection after response");
            self.socket.close();
        }
    }

    async fn write_message(&self, job: JobId, message: HttpMessage) {
        if let Some(method) = message.method() {
            self.requests.push(method);
        }
        let is_response = !message.is_request();
        let answers_head =
            is_response && self.last_request.lock().as_ref().is_some_and(PeerRequest::is_head);
        let frame = if answers_head { message.head_bytes() } else { message.to_bytes() };
        if !self.write(job, frame).await {
            return;
        }
        let closes = is_response && !message.keep_alive();
        if self.diagnostics() {
            self.events.emit(&HttpEvent::PacketSent(message));
        }
        if is_response {
            self.finish_response(closes);
        }
    }

    async fn write_stream(&self, job: JobId, stream: StreamSendJob, cancel: &AtomicBool) -> StreamOutcome {
        let is_response = stream.is_response();
        let mut prepared = match stream.prepare(&self.config).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!("Stream job {} could not be prepared: {}", job, e);
                self.socket.close();
                return StreamOutcome::Failed(e.to_string());
            }
        };

        if let Some(method) = prepared.head().method() {
            self.requests.push(method);
        }
        if self.diagnostics() {
            self.events.emit(&HttpEvent::PacketSent(prepared.head().clone()));
        }

        loop {
            if cancel.load(Ordering::SeqCst) {
                if !prepared.started() {
                    return StreamOutcome::Cancelled;
                }
                match prepared.cancel_frame() {
                    Some(frame) => {
                        self.write(job, frame).await;
                    }
                    None => self.socket.close(),
                }
                tracing::debug!("Stream job {} cancelled", job);
                return StreamOutcome::Cancelled;
            }

            let frame = match prepared.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Stream job {} source failed: {}", job, e);
                    self.socket.close();
                    return StreamOutcome::Failed(e.to_string());
                }
            };
            if !self.write(job, frame).await {
                return StreamOutcome::Disconnected;
            }
        }

        tracing::debug!("Stream job {} complete", job);
        if is_response {
            self.finish_response(prepared.closes_connection());
        }
        StreamOutcome::Completed
    }
}

/// Drain the job queue one job at a time.
async fn pump(inner: Arc<ConnInner>) {
    loop {
        let (job, cancel) = {
            let mut jobs = inner.jobs.lock();
            match jobs.pending.pop_front() {
                Some(job) => {
                    let cancel = Arc::new(AtomicBool::new(false));
                    jobs.active = Some(ActiveJob {
                        id: job.id,
                        cancel: cancel.clone(),
                    });
                    (job, cancel)
                }
                None => {
                    jobs.active = None;
                    jobs.pumping = false;
                    return;
                }
            }
        };

        match job.work {
            Work::Message(message) => inner.write_message(job.id, message).await,
            Work::Stream(stream) => {
                let outcome = inner.write_stream(job.id, stream, &cancel).await;
                inner.events.emit(&HttpEvent::StreamDone {
                    job: job.id,
                    outcome,
                });
            }
        }
        inner.jobs.lock().active = None;
    }
}

/// Receive handler that parses HTTP messages out of the socket's window.
struct HttpReceiver {
    parser: MessageParser,
    conn: Arc<ConnInner>,
    pending: Vec<ParseEvent>,
}

impl HttpReceiver {
    /// Publish parse events. Returns whether the connection must close.
    fn dispatch(&mut self) -> bool {
        let mut close = false;
        for event in std::mem::take(&mut self.pending) {
            match event {
                ParseEvent::Headers { head, has_body } => {
                    if head.is_request() {
                        self.conn.note_request(&head);
                    }
                    if has_body {
                        if let Some(sink) = self.conn.sink_for(&head) {
                            self.parser.attach_sink(sink);
                        }
                    }
                    self.conn.events.emit(&HttpEvent::HeadersReceived(head));
                }
                ParseEvent::Message(message) => {
                    if !message.is_request() && !message.keep_alive() {
                        close = true;
                    }
                    if self.conn.diagnostics() {
                        self.conn.events.emit(&HttpEvent::PacketParsed(message.clone()));
                    }
                    self.conn.events.emit(&HttpEvent::MessageReceived(message));
                }
            }
        }
        close
    }
}

impl ReceiveHandler for HttpReceiver {
    fn on_data(&mut self, delivery: Delivery<'_>) -> Flow {
        let progress = match self.parser.parse(delivery.data, &mut self.pending) {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!("Protocol error from {:?}: {}", self.conn.socket.peer_addr(), e);
                return Flow::Abort(e.to_string());
            }
        };

        if self.conn.diagnostics() && progress.consumed > 0 {
            self.conn.events.emit(&HttpEvent::RawReceived(Bytes::copy_from_slice(
                &delivery.data[..progress.consumed],
            )));
        }

        if self.dispatch() {
            self.conn.socket.close();
            return Flow::Stop {
                consumed: progress.consumed,
                wanted: progress.wanted,
            };
        }

        Flow::Continue {
            consumed: progress.consumed,
            wanted: progress.wanted,
        }
    }

    fn on_end(&mut self, reason: &DisconnectReason) {
        if *reason != DisconnectReason::PeerClosed {
            return;
        }
        if let Err(e) = self.parser.end_of_input(&mut self.pending) {
            tracing::debug!("Peer closed mid-message: {}", e);
        }
        // the transport is about to disconnect anyway
        self.dispatch();
    }
}
