//! TCP BIND executor
//!
//! Opens a listener for the client, announces it, waits a bounded time for a
//! single inbound peer and relays between the client and that peer.
//!
//! ```text
//! client            socksd                     peer
//!   | BIND ------------>|                          |
//!   |<--- 05 00 (listen addr)                      |
//!   |                   |<---------- connect ------|
//!   |<--- 05 00 (peer addr)                        |
//!   |<================= relay ===================>|
//! ```

use super::connection::Connection;
use super::consts::MAX_BIND_RETRIES;
use super::relay::relay;
use super::reply::UNSPECIFIED_BIND_ADDR;
use super::types::Request;
use crate::error::ReplyCode;
use crate::helper::{
    random_port, DEFAULT_BIND_WAIT_MS, DEFAULT_MAX_BIND_PORT, DEFAULT_MIN_BIND_PORT,
};
use anyhow::{Context, Result};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Client bytes buffered while waiting for a peer before reads are paused
const MAX_EARLY_BYTES: usize = 64 * 1024;

/// BIND listener settings
#[derive(Debug, Clone)]
pub struct BindOptions {
    /// Address listeners are opened on
    pub host: IpAddr,
    /// Lower bound of the random port range
    pub min_port: u16,
    /// Upper bound of the random port range
    pub max_port: u16,
    /// How long a listener waits for its peer
    pub max_wait: Duration,
    /// Set TCP_NODELAY on accepted peers
    pub nodelay: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        BindOptions {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            min_port: DEFAULT_MIN_BIND_PORT,
            max_port: DEFAULT_MAX_BIND_PORT,
            max_wait: Duration::from_millis(DEFAULT_BIND_WAIT_MS),
            nodelay: false,
        }
    }
}

impl BindOptions {
    /// Pick a random port from the configured range
    pub fn random_port(&self) -> u16 {
        random_port(self.min_port, self.max_port)
    }

    /// Initial port for a request
    ///
    /// A fixed port from the auth context wins. Otherwise port 0 asks for a
    /// random port and any other value is used as requested.
    pub fn select_port(&self, request: &Request) -> u16 {
        if let Some(port) = request.auth.bind_port() {
            return port;
        }
        match request.dst_port() {
            0 => self.random_port(),
            port => port,
        }
    }
}

/// How the wait for a BIND peer ended
#[derive(Debug)]
pub enum BindWait {
    /// A peer connected
    Peer(TcpStream, SocketAddr),
    /// No peer connected in time
    Expired,
    /// The client went away while waiting
    Abandoned,
    /// `accept()` failed
    Failed(io::Error),
}

/// A listening socket opened for one BIND request
///
/// Consumed by [`wait`](BindSession::wait), which closes the listener on
/// every outcome.
#[derive(Debug)]
pub struct BindSession {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BindSession {
    /// Open a listener, resolving port conflicts
    ///
    /// On `EADDRINUSE` the conflict hook of the request's auth context picks
    /// the next port, at most [`MAX_BIND_RETRIES`] times per context. Without a
    /// hook a new random port is tried until one is free. Any other error is
    /// returned.
    pub async fn open(request: &Request, opts: &BindOptions) -> io::Result<Self> {
        let mut port = opts.select_port(request);
        loop {
            let addr = SocketAddr::new(opts.host, port);
            let err = match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    return Ok(BindSession {
                        listener,
                        local_addr,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => e,
                Err(e) => return Err(e),
            };

            port = match request.auth.bind_conflict_hook() {
                Some(hook) => {
                    if request.auth.bind_retries() >= MAX_BIND_RETRIES {
                        warn!(
                            "Port {} in use, giving up after {} retries (user = {})",
                            port,
                            MAX_BIND_RETRIES,
                            request.user()
                        );
                        return Err(err);
                    }
                    let attempt = request.auth.record_bind_retry();
                    match hook.on_conflict(port, &err) {
                        Some(next) => {
                            debug!("Port {} in use, retry {} on port {}", port, attempt, next);
                            next
                        }
                        None => {
                            debug!("Port {} in use, conflict hook gave up", port);
                            return Err(err);
                        }
                    }
                }
                None => {
                    let next = opts.random_port();
                    debug!("Port {} in use, trying {}", port, next);
                    // The whole range may be taken; let other tasks run
                    tokio::task::yield_now().await;
                    next
                }
            };
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `max_wait` for a single peer, then close the listener
    ///
    /// The client stream is watched meanwhile: its end abandons the wait, and
    /// bytes it sends early stay buffered in the connection.
    pub async fn wait<S>(self, conn: &mut Connection<S>, max_wait: Duration) -> BindWait
    where
        S: AsyncRead + Unpin,
    {
        let BindSession { listener, .. } = self;
        let deadline = Instant::now() + max_wait;

        let outcome = loop {
            let can_read = conn.pending_len() < MAX_EARLY_BYTES;
            tokio::select! {
                accepted = listener.accept() => {
                    break match accepted {
                        Ok((stream, addr)) => BindWait::Peer(stream, addr),
                        Err(e) => BindWait::Failed(e),
                    };
                }
                _ = tokio::time::sleep_until(deadline) => break BindWait::Expired,
                read = conn.read_ahead(), if can_read => {
                    match read {
                        Ok(0) => break BindWait::Abandoned,
                        Ok(_) => continue,
                        Err(e) => {
                            debug!("Client error while waiting for BIND peer: {}", e);
                            break BindWait::Abandoned;
                        }
                    }
                }
            }
        };

        // Only one peer is ever accepted
        drop(listener);
        outcome
    }
}

/// Handle TCP BIND command
///
/// Listen failures close the client connection without a reply. Once the
/// first reply is out, the request ends with a second SUCCESS and a relay,
/// with TTLEXPIRED, or with GENFAIL when accepting fails.
pub async fn handle_bind<S>(mut conn: Connection<S>, request: &Request, opts: &BindOptions) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let session = match BindSession::open(request, opts).await {
        Ok(session) => session,
        Err(e) => {
            warn!(
                "Bind failed (from = {}) (user = {}): {}",
                request.source,
                request.user(),
                e
            );
            conn.close().await;
            return Ok(());
        }
    };

    let listen_addr = session.local_addr();
    info!(
        "Bind on {} (from = {}) (user = {})",
        listen_addr,
        request.source,
        request.user()
    );

    conn.reply_interim(listen_addr)
        .await
        .with_context(|| format!("Failed to announce bind address to {}", request.source))?;

    match session.wait(&mut conn, opts.max_wait).await {
        BindWait::Peer(peer, peer_addr) => {
            if opts.nodelay {
                if let Err(e) = peer.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
            }
            info!("Bind peer {} connected to {}", peer_addr, listen_addr);
            conn.reply(ReplyCode::Succeeded, peer_addr)
                .await
                .with_context(|| format!("Failed to send reply to {}", request.source))?;

            let stats = relay(conn, peer).await;
            info!(
                "Bind session {} closed (peer = {}) ({} bytes sent, {} bytes received)",
                listen_addr, peer_addr, stats.a_to_b, stats.b_to_a
            );
        }
        BindWait::Expired => {
            info!(
                "Bind on {} expired after {:?} without a peer",
                listen_addr, opts.max_wait
            );
            conn.reply(ReplyCode::TtlExpired, UNSPECIFIED_BIND_ADDR)
                .await
                .context("Failed to send TTL expired reply")?;
            conn.close().await;
        }
        BindWait::Abandoned => {
            debug!("Client {} left before a peer connected", request.source);
        }
        BindWait::Failed(e) => {
            warn!("Accept failed on {}: {}", listen_addr, e);
            conn.reply(ReplyCode::GeneralFailure, UNSPECIFIED_BIND_ADDR)
                .await
                .context("Failed to send failure reply")?;
            conn.close().await;
        }
    }

    Ok(())
}
