//! Outbound send entries and the per-socket send queue.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{DisconnectReason, Result, TransportError};

/// Caller-chosen tag echoed back in `SendReady` notifications.
pub type SendTag = u64;

/// One pending send.
#[derive(Debug)]
pub struct SendEntry {
    data: Bytes,
    destination: Option<SocketAddr>,
    tag: Option<SendTag>,
    done: Option<oneshot::Sender<Result<()>>>,
}

impl SendEntry {
    /// Send the whole buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            destination: None,
            tag: None,
            done: None,
        }
    }

    /// Send `length` bytes of `data` starting at `offset`.
    pub fn slice(data: impl Into<Bytes>, offset: usize, length: usize) -> Result<Self> {
        let data = data.into();
        let in_bounds = offset
            .checked_add(length)
            .map(|end| end <= data.len())
            .unwrap_or(false);
        if !in_bounds {
            return Err(TransportError::InvalidSendRange {
                offset,
                length,
                available: data.len(),
            });
        }
        Ok(Self::new(data.slice(offset..offset + length)))
    }

    /// Datagram destination. Ignored by stream sockets.
    pub fn to(mut self, destination: SocketAddr) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn tagged(mut self, tag: SendTag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    pub fn tag(&self) -> Option<SendTag> {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn with_completion(mut self) -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        self.done = Some(tx);
        (self, rx)
    }

    pub(crate) fn complete(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Ok(()));
        }
    }

    pub(crate) fn fail(&mut self, reason: &DisconnectReason) {
        if let Some(done) = self.done.take() {
            let _ = done.send(Err(TransportError::Disconnected(reason.clone())));
        }
    }
}

/// FIFO of pending sends plus the counters guarded with it.
///
/// `writer` is present while no send is in flight; the drain task takes it
/// out for the duration of a burst, which is what enforces the
/// at-most-one-outstanding-send rule.
pub(crate) struct SendQueue<W> {
    pub(crate) writer: Option<W>,
    pub(crate) entries: VecDeque<SendEntry>,
    pub(crate) in_flight: bool,
    pub(crate) bytes_sent: u64,
    pub(crate) sends_completed: u64,
}

impl<W> SendQueue<W> {
    pub(crate) fn new() -> Self {
        Self {
            writer: None,
            entries: VecDeque::new(),
            in_flight: false,
            bytes_sent: 0,
            sends_completed: 0,
        }
    }

    /// Queue an entry; returns the writer when the caller must start a drain.
    pub(crate) fn push(&mut self, entry: SendEntry) -> Option<W> {
        self.entries.push_back(entry);
        self.take_writer_if_idle()
    }

    pub(crate) fn take_writer_if_idle(&mut self) -> Option<W> {
        if self.in_flight || self.entries.is_empty() {
            return None;
        }
        let writer = self.writer.take()?;
        self.in_flight = true;
        Some(writer)
    }

    /// Next entry for the drain task, or `None` after parking the writer.
    pub(crate) fn next_or_park(&mut self, writer: &mut Option<W>) -> Option<SendEntry> {
        match self.entries.pop_front() {
            Some(entry) => Some(entry),
            None => {
                self.writer = writer.take();
                self.in_flight = false;
                None
            }
        }
    }

    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.sends_completed += 1;
    }

    pub(crate) fn drain_pending(&mut self) -> Vec<SendEntry> {
        self.writer = None;
        self.entries.drain(..).collect()
    }
}
