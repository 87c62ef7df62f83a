//! Buffer-windowed asynchronous transport for the UPnP HTTP engine.
//!
//! This crate wraps one TCP or UDP socket per [`TransportSocket`] and knows
//! nothing about HTTP. It provides:
//!
//! - A fixed-capacity receive window ([`RecvWindow`]) with explicit
//!   compaction. After every raw read the unconsumed bytes are handed to a
//!   [`ReceiveHandler`], which answers with a [`Flow`] stating how much it
//!   consumed and how much more it needs. Leftover bytes are redelivered
//!   without further network I/O while the handler keeps making progress.
//! - A FIFO send queue with at most one send in flight per socket.
//! - A single-fire disconnect notification, whatever mix of send, receive
//!   and connect failures caused it.
//! - An explicit subscriber registry ([`Subscribers`]) for
//!   [`TransportEvent`]s.
//!
//! There is no retry of any kind: transport failures are reported once and
//! reconnection policy belongs to the caller.
//!
//! # Example
//!
//! ```no_run
//! use upnp_transport::{Flow, SendEntry, TransportConfig, TransportEvent, TransportListener};
//!
//! #[tokio::main]
//! async fn main() -> upnp_transport::Result<()> {
//!     let listener = TransportListener::bind(
//!         "127.0.0.1:0".parse().unwrap(),
//!         TransportConfig::default(),
//!     )
//!     .await?;
//!
//!     let socket = listener.accept().await?;
//!     socket.subscribe(|event| {
//!         if let TransportEvent::Disconnected(reason) = event {
//!             println!("gone: {reason}");
//!         }
//!     });
//!
//!     let echo = socket.clone();
//!     socket.begin_receiving(move |delivery: upnp_transport::Delivery<'_>| {
//!         let _ = echo.send(SendEntry::new(delivery.data.to_vec()));
//!         Flow::Continue { consumed: delivery.data.len(), wanted: 1024 }
//!     })?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod listener;
pub mod receive;
pub mod send;
pub mod socket;
pub mod window;

pub use config::TransportConfig;
pub use error::{DisconnectReason, Result, TransportError};
pub use events::{SubscriptionId, Subscribers};
pub use listener::TransportListener;
pub use receive::{deliver, Delivery, DeliveryOutcome, Flow, ReceiveControl, ReceiveHandler};
pub use send::{SendEntry, SendTag};
pub use socket::{Protocol, SocketState, TransportEvent, TransportSocket, TransportStats};
pub use window::RecvWindow;
