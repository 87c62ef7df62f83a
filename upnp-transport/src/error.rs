//! Error types for the upnp-transport crate.

use std::fmt;
use std::io;

use crate::socket::SocketState;

/// Errors returned by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The requested protocol is neither TCP nor UDP
    #[error("Unsupported protocol: {0}")]
    ProtocolUnsupported(String),

    /// A stream-only operation was invoked on a datagram socket
    #[error("Operation requires a stream socket")]
    NotStream,

    /// The socket is not in a state that allows the operation
    #[error("Invalid socket state for {operation}: {state:?}")]
    InvalidState {
        /// The operation that was attempted
        operation: &'static str,
        /// The state the socket was in
        state: SocketState,
    },

    /// The offset/length pair of a send entry does not fit its buffer
    #[error("Send range {offset}+{length} exceeds buffer of {available} bytes")]
    InvalidSendRange {
        /// Start of the range
        offset: usize,
        /// Length of the range
        length: usize,
        /// Size of the buffer
        available: usize,
    },

    /// An underlying socket operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The socket went down before the operation completed
    #[error("Socket disconnected: {0}")]
    Disconnected(DisconnectReason),

    /// No port in the requested range could be bound
    #[error("No available port found in range {start}-{end}")]
    NoPortAvailable {
        /// First port tried
        start: u16,
        /// Last port tried
        end: u16,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a socket was torn down.
///
/// Delivered exactly once per socket through
/// [`TransportEvent::Disconnected`](crate::TransportEvent::Disconnected).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close()` was called locally
    Closed,
    /// The peer closed its side (zero-byte read)
    PeerClosed,
    /// A raw receive failed
    ReceiveFailed(String),
    /// A raw send failed
    SendFailed(String),
    /// The asynchronous connect failed
    ConnectFailed(String),
    /// The receive window filled up while the handler made no progress
    BufferFull {
        /// Capacity of the receive window
        capacity: usize,
    },
    /// The receive handler aborted the connection
    Aborted(String),
}

impl DisconnectReason {
    /// Whether the disconnect was caused by a failure rather than an orderly close.
    pub fn is_error(&self) -> bool {
        !matches!(self, DisconnectReason::Closed | DisconnectReason::PeerClosed)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "closed locally"),
            DisconnectReason::PeerClosed => write!(f, "closed by peer"),
            DisconnectReason::ReceiveFailed(e) => write!(f, "receive failed: {e}"),
            DisconnectReason::SendFailed(e) => write!(f, "send failed: {e}"),
            DisconnectReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            DisconnectReason::BufferFull { capacity } => {
                write!(f, "receive window full ({capacity} bytes)")
            }
            DisconnectReason::Aborted(e) => write!(f, "aborted: {e}"),
        }
    }
}

/// Convenience type alias for Results using TransportError.
pub type Result<T> = std::result::Result<T, TransportError>;
