//! TLS transport implementation
//!
//! Provides a TLS listener using rustls (pure Rust, easy static linking).
//! The certificate chain and private key are loaded from PEM files.

use super::{SocketOpts, StreamDyn, Transport};
use crate::config::TlsConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;

/// TLS transport for encrypted client connections
pub struct TlsTransport {
    listener: TcpListener,
    /// TLS acceptor
    acceptor: TlsAcceptor,
    /// Socket options to apply to accepted connections
    socket_opts: SocketOpts,
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("listener", &self.listener)
            .field("socket_opts", &self.socket_opts)
            .finish()
    }
}

impl TlsTransport {
    /// Listen on `addr` with the certificate and key named in `config`
    pub async fn bind(addr: SocketAddr, config: &TlsConfig, socket_opts: SocketOpts) -> Result<Self> {
        let acceptor = build_acceptor(config)?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to listen on {}", addr))?;
        Ok(TlsTransport {
            listener,
            acceptor,
            socket_opts,
        })
    }
}

/// Build a TLS acceptor from PEM files
pub fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&config.cert)?;
    let key = load_private_key(&config.key)?;

    let tls_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .with_context(|| "Invalid TLS certificate or key")?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open certificate file: {:?}", path))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates from: {:?}", path))?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in {:?}", path));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("Failed to open key file: {:?}", path))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("Failed to parse private key from: {:?}", path))?
        .ok_or_else(|| anyhow!("No private key found in {:?}", path))
}

#[async_trait]
impl Transport for TlsTransport {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    async fn handshake(&self, stream: TcpStream) -> Result<Box<dyn StreamDyn>> {
        // Options go on the TCP stream before the handshake
        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }

        let peer = stream.peer_addr().ok();
        let tls_stream = self
            .acceptor
            .accept(stream)
            .await
            .with_context(|| format!("TLS handshake failed with {:?}", peer))?;

        tracing::debug!("TLS connection established with {:?}", peer);

        Ok(Box::new(tls_stream))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
