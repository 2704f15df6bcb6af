//! Transport module for Socksd
//!
//! This module provides the client-facing listener abstraction and its
//! implementations (plain TCP, TLS).

mod tcp;
#[cfg(feature = "rustls-tls")]
mod tls;

pub use tcp::TcpTransport;
#[cfg(feature = "rustls-tls")]
pub use tls::TlsTransport;

use crate::config::ServerConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Socket options for configuring connections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl SocketOpts {
    /// Create socket options from the server config
    pub fn from_server_config(config: &ServerConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: config.keepalive_secs,
            keepalive_interval: config.keepalive_interval,
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let Some(timeout) = self.keepalive_secs {
            let socket = socket2::SockRef::from(stream);
            let mut keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(timeout));
            if let Some(interval) = self.keepalive_interval {
                keepalive = keepalive.with_interval(Duration::from_secs(interval));
            }
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Accept side of a client-facing transport
///
/// [`accept`](Transport::accept) runs on the server's accept loop and only
/// yields raw TCP streams. Anything slow, like a TLS handshake, belongs in
/// [`handshake`](Transport::handshake), which runs in the connection's own
/// task.
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Accept the next TCP connection
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;

    /// Turn an accepted TCP stream into the byte stream the protocol runs on
    async fn handshake(&self, stream: TcpStream) -> Result<Box<dyn StreamDyn>>;

    /// Address the transport listens on
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Bind the transport described by the server config
pub async fn create_transport(config: &ServerConfig) -> Result<Box<dyn Transport>> {
    let socket_opts = SocketOpts::from_server_config(config);
    match &config.tls {
        None => {
            let transport = TcpTransport::bind(config.listen, socket_opts).await?;
            Ok(Box::new(transport))
        }
        #[cfg(feature = "rustls-tls")]
        Some(tls) => {
            let transport = TlsTransport::bind(config.listen, tls, socket_opts).await?;
            Ok(Box::new(transport))
        }
        #[cfg(not(feature = "rustls-tls"))]
        Some(_) => anyhow::bail!("TLS listener requested but the rustls-tls feature is disabled"),
    }
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug> StreamDyn for T {}
