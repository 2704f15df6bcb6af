//! TCP transport implementation
//!
//! Provides the plain TCP listener.

use super::{SocketOpts, StreamDyn, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// TCP transport for plain connections
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    /// Socket options to apply to accepted connections
    socket_opts: SocketOpts,
}

impl TcpTransport {
    /// Listen on `addr`
    pub async fn bind(addr: SocketAddr, socket_opts: SocketOpts) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to listen on {}", addr))?;
        Ok(TcpTransport {
            listener,
            socket_opts,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    async fn handshake(&self, stream: TcpStream) -> Result<Box<dyn StreamDyn>> {
        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }
        Ok(Box::new(stream))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
