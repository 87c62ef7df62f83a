//! TCP listener that hands out accepted connections as transport sockets.

use std::net::{IpAddr, SocketAddr};

use tokio::net::TcpListener;

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::socket::TransportSocket;

/// Accepts inbound TCP connections.
///
/// # Example
///
/// ```no_run
/// use upnp_transport::{TransportConfig, TransportListener};
///
/// #[tokio::main]
/// async fn main() -> upnp_transport::Result<()> {
///     let listener = TransportListener::bind_in_range(
///         "0.0.0.0".parse().unwrap(),
///         (3400, 3500),
///         TransportConfig::default(),
///     )
///     .await?;
///     println!("Listening at {}", listener.local_addr()?);
///
///     let socket = listener.accept().await?;
///     println!("Accepted {:?}", socket.peer_addr());
///     Ok(())
/// }
/// ```
pub struct TransportListener {
    listener: TcpListener,
    config: TransportConfig,
}

impl TransportListener {
    /// Bind to `addr`.
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    /// Bind to the first free port in `port_range` (inclusive).
    pub async fn bind_in_range(
        ip: IpAddr,
        port_range: (u16, u16),
        config: TransportConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (start, end) = port_range;
        for port in start..=end {
            match TcpListener::bind(SocketAddr::new(ip, port)).await {
                Ok(listener) => {
                    tracing::info!("Listening on {}", SocketAddr::new(ip, port));
                    return Ok(Self { listener, config });
                }
                Err(e) => {
                    tracing::trace!("Port {} unavailable: {}", port, e);
                }
            }
        }
        Err(TransportError::NoPortAvailable { start, end })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next connection.
    pub async fn accept(&self) -> Result<TransportSocket> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);
        TransportSocket::adopt_tcp(stream, self.config.clone())
    }
}
