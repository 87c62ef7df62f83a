//! Receive-side contract between the transport and its protocol layer.
//!
//! After every raw read the transport hands the unconsumed window to a
//! [`ReceiveHandler`]. The handler answers with a [`Flow`] saying how many
//! bytes it consumed and how many more it needs. Leftover bytes are compacted
//! and redelivered without touching the network for as long as the handler
//! keeps making progress; only then is the next raw read issued.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::error::DisconnectReason;
use crate::window::RecvWindow;

/// One delivery of buffered bytes to a receive handler.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    /// The unconsumed window
    pub data: &'a [u8],
    /// Source address of the datagram, for UDP sockets
    pub from: Option<SocketAddr>,
}

/// Handler verdict for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// `consumed` bytes were used; at least `wanted` more are needed
    Continue { consumed: usize, wanted: usize },
    /// Like `Continue`, then pause delivery until `start_receiving` is called
    Stop { consumed: usize, wanted: usize },
    /// The peer violated the protocol; tear the connection down
    Abort(String),
}

impl Flow {
    /// Nothing consumed, `wanted` more bytes are required.
    pub fn need(wanted: usize) -> Self {
        Flow::Continue {
            consumed: 0,
            wanted,
        }
    }
}

/// Protocol layer sitting on top of a transport socket.
///
/// The handler is owned by the socket's receive task, so it is only ever
/// called from one task at a time and may keep mutable parser state.
pub trait ReceiveHandler {
    /// Size of the first raw read, or `None` for the configured default.
    fn initial_read_size(&self) -> Option<usize> {
        None
    }

    /// Process the buffered window.
    fn on_data(&mut self, delivery: Delivery<'_>) -> Flow;

    /// Called by the receive task when the read side ends, before the
    /// disconnect notification is published.
    fn on_end(&mut self, _reason: &DisconnectReason) {}
}

impl<F> ReceiveHandler for F
where
    F: FnMut(Delivery<'_>) -> Flow,
{
    fn on_data(&mut self, delivery: Delivery<'_>) -> Flow {
        self(delivery)
    }
}

/// Cooperative pause switch for the delivery loop.
///
/// The flag is checked before every delivery, including redeliveries of
/// compacted leftovers, so a stop requested from any thread takes effect at
/// the next step.
#[derive(Debug, Default)]
pub struct ReceiveControl {
    stopped: AtomicBool,
    resume: Notify,
}

impl ReceiveControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn start(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.resume.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait until [`start`](Self::start) has been called.
    pub async fn wait_resumed(&self) {
        loop {
            let notified = self.resume.notified();
            if !self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Result of running the delivery loop over a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing more can be done without a raw read
    NeedRead,
    /// Delivery is paused by the receive control
    Paused,
    /// The connection must be torn down
    Abort(DisconnectReason),
}

/// Deliver the window to `handler` until it is exhausted, the handler stops
/// making progress, or delivery is paused.
///
/// On return the window is compacted and `wanted` holds the handler's last
/// request, clamped to the free space.
pub fn deliver<H>(
    window: &mut RecvWindow,
    handler: &mut H,
    from: Option<SocketAddr>,
    control: &ReceiveControl,
) -> DeliveryOutcome
where
    H: ReceiveHandler + ?Sized,
{
    loop {
        if window.is_empty() {
            window.compact();
            return DeliveryOutcome::NeedRead;
        }
        if control.is_stopped() {
            return DeliveryOutcome::Paused;
        }

        let available = window.len();
        let flow = handler.on_data(Delivery {
            data: window.data(),
            from,
        });
        let (consumed, wanted, stop) = match flow {
            Flow::Continue { consumed, wanted } => (consumed, wanted, false),
            Flow::Stop { consumed, wanted } => (consumed, wanted, true),
            Flow::Abort(message) => {
                return DeliveryOutcome::Abort(DisconnectReason::Aborted(message));
            }
        };

        if consumed > available {
            return DeliveryOutcome::Abort(DisconnectReason::Aborted(format!(
                "handler consumed {consumed} of {available} buffered bytes"
            )));
        }

        window.consume(consumed);
        window.compact();
        let granted = window.request(wanted);
        tracing::trace!(
            consumed,
            wanted,
            granted,
            leftover = window.len(),
            "window delivery step"
        );

        if consumed == 0 && granted == 0 {
            return DeliveryOutcome::Abort(DisconnectReason::BufferFull {
                capacity: window.capacity(),
            });
        }
        if stop {
            control.stop();
            return DeliveryOutcome::Paused;
        }
        if consumed == 0 {
            return DeliveryOutcome::NeedRead;
        }
    }
}
