//! HTTP/1.x protocol engine for UPnP devices and control points.
//!
//! Built on [`upnp_transport`], this crate parses inbound messages
//! incrementally straight out of the transport's receive window and writes
//! outbound messages and streamed bodies with the framing the peer
//! understands:
//!
//! - Header blocks, `Content-Length`, chunked and close-delimited bodies,
//!   with chunk sizes and trailers steering the size of every raw read
//!   ([`MessageParser`], [`ChunkState`]).
//! - Whole-message sends and streamed bodies from any seekable async source,
//!   sent in bounded slices as `Transfer-Encoding: chunked` to HTTP/1.1
//!   peers and with `Content-Length` to HTTP/1.0 peers.
//! - Byte-range responses: a single range directly, several as
//!   `multipart/byteranges` ([`range`]).
//! - One job on the wire at a time; further messages and streams queue in
//!   FIFO order behind it.
//!
//! A peer that violates the framing gets its connection closed; nothing is
//! retried.
//!
//! # Example
//!
//! ```no_run
//! use upnp_http::{HttpConfig, HttpConnection, HttpEvent, HttpMessage};
//!
//! #[tokio::main]
//! async fn main() -> upnp_http::Result<()> {
//!     let conn = HttpConnection::connect("192.168.1.20:1400".parse().unwrap(), HttpConfig::default()).await?;
//!     let (_, mut events) = conn.subscribe_channel();
//!     conn.begin_receiving()?;
//!
//!     conn.send_message(
//!         HttpMessage::request("GET", "/xml/device_description.xml")
//!             .with_header("Host", "192.168.1.20:1400"),
//!     )?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let HttpEvent::MessageReceived(response) = event {
//!             println!("{:?}: {} bytes", response.status(), response.body.len());
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod chunked;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod message;
pub mod parse;
pub mod parser;
pub mod range;
pub mod stream;

pub use config::HttpConfig;
pub use connection::{HttpConnection, HttpEvent, SinkProvider};
pub use error::{HttpError, ProtocolError, RangeError, Result};
pub use message::{reason_phrase, Framing, Headers, HttpMessage, StartLine, Version};
pub use parser::{BodySink, ChunkState, MessageParser, ParseEvent, ParserLimits, ParserState, Progress, RequestLog};
pub use range::{parse_range_header, parse_range_headers, requested_ranges, resolve_ranges, ByteRange, Multipart, RangeSpec};
pub use stream::{JobId, PeerRequest, PreparedStream, StreamOutcome, StreamSendJob, StreamSource};
