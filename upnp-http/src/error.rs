//! Error types for the upnp-http crate.

use std::io;

use upnp_transport::TransportError;

/// Framing violations committed by the peer.
///
/// Any of these aborts the connection through the transport's disconnect
/// path; the message text ends up in
/// [`DisconnectReason::Aborted`](upnp_transport::DisconnectReason::Aborted).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The header block did not terminate within the configured budget
    #[error("Header block exceeds {limit} bytes")]
    HeaderTooLarge {
        /// Configured limit
        limit: usize,
    },

    /// The request or status line could not be parsed
    #[error("Invalid start line: {0}")]
    InvalidStartLine(String),

    /// A header line has no `:` delimiter or is not UTF-8
    #[error("Invalid header line: {0}")]
    InvalidHeaderLine(String),

    /// Unknown protocol version
    #[error("Unsupported HTTP version: {0}")]
    InvalidVersion(String),

    /// The Content-Length header is not a decimal number
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// The chunk-size line does not start with a hex number
    #[error("Invalid chunk size line: {0}")]
    InvalidChunkSize(String),

    /// The chunk-size line did not terminate within the configured budget
    #[error("Chunk size line exceeds {limit} bytes")]
    ChunkLineTooLong {
        /// Configured limit
        limit: usize,
    },

    /// Chunk data was not followed by CRLF
    #[error("Chunk data not terminated by CRLF")]
    InvalidChunkTerminator,

    /// Trailer section did not terminate within the configured budget
    #[error("Chunked trailer exceeds {limit} bytes")]
    TrailerTooLarge {
        /// Configured limit
        limit: usize,
    },

    /// An internally buffered body grew past the configured cap
    #[error("Message body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured limit
        limit: u64,
    },

    /// Bytes arrived after a message that ended the connection
    #[error("Received {bytes} bytes after the final message on this connection")]
    UnexpectedData {
        /// Number of unexpected bytes buffered
        bytes: usize,
    },

    /// The connection ended in the middle of a message
    #[error("Connection ended inside a message body")]
    Truncated,

    /// The body sink refused data
    #[error("Body sink failed: {0}")]
    SinkFailed(String),
}

/// Malformed or unsatisfiable `Range` header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// Only `bytes` ranges are understood
    #[error("Unsupported range unit: {0}")]
    UnsupportedUnit(String),

    /// The header could not be parsed
    #[error("Malformed range: {0}")]
    Malformed(String),

    /// No requested range overlaps the resource
    #[error("No satisfiable range in a resource of {total} bytes")]
    Unsatisfiable {
        /// Resource length
        total: u64,
    },
}

/// Errors returned by the HTTP connection API.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The transport rejected or failed the operation
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The peer violated HTTP framing
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection is closed
    #[error("Connection closed")]
    Closed,

    /// A `Range` header could not be honoured
    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    /// Reading a stream source failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience type alias for results in this crate.
pub type Result<T> = std::result::Result<T, HttpError>;
