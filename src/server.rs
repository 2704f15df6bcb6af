//! SOCKS5 server
//!
//! Accepts client connections from a [`Transport`] and serves each one in its
//! own task, enforcing an optional ceiling on concurrent connections.

use crate::config::Config;
use crate::helper::{duration_from_millis, ACCEPT_ERROR_DELAY};
use crate::socks::{
    AuthRegistry, BindOptions, ConnectOptions, Connection, ConnectionHandler, ConnectionObserver,
    Outcome,
};
use crate::transport::{create_transport, Transport};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Decrements the live connection gauge when the connection task ends
struct ConnectionGuard {
    connections: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn new(connections: Arc<AtomicUsize>) -> Self {
        connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard { connections }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// SOCKS5 server
#[derive(Debug)]
pub struct Server {
    transport: Arc<dyn Transport>,
    handler: Arc<ConnectionHandler>,
    max_connections: Option<usize>,
    connections: Arc<AtomicUsize>,
}

impl Server {
    /// Create a server on an already bound transport
    pub fn new(transport: Box<dyn Transport>, handler: ConnectionHandler) -> Self {
        Server {
            transport: Arc::from(transport),
            handler: Arc::new(handler),
            max_connections: None,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Limit the number of concurrent client connections
    pub fn with_max_connections(mut self, max: Option<usize>) -> Self {
        self.max_connections = max;
        self
    }

    /// Bind the transport and build the handler described by `config`
    pub async fn from_config(
        config: &Config,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Result<Self> {
        let auth = AuthRegistry::from_config(&config.auth)
            .with_context(|| "Failed to set up authentication")?;

        let server = &config.server;
        let bind = BindOptions {
            host: server.bind.host,
            min_port: server.bind.min_port,
            max_port: server.bind.max_port,
            max_wait: duration_from_millis(server.bind.max_wait_ms),
            nodelay: server.nodelay,
        };
        let connect = ConnectOptions {
            timeout: duration_from_millis(server.connect_timeout_ms),
            nodelay: server.nodelay,
        };

        let mut handler = ConnectionHandler::new(auth, bind).with_connect_options(connect);
        if let Some(observer) = observer {
            handler = handler.with_observer(observer);
        }

        let transport = create_transport(server).await?;
        Ok(Server::new(transport, handler).with_max_connections(server.max_connections))
    }

    /// Address the server accepts clients on
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Number of client connections currently being served
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Accept and serve clients until `shutdown` fires
    ///
    /// Connections already being served keep running after shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<bool>) -> Result<()> {
        info!("Listening on {}", self.transport.local_addr()?);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.dispatch(stream, peer),
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down server");
                    break;
                }
            }
        }

        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        // Only this loop increments, so the check cannot be raced past the limit
        if let Some(max) = self.max_connections {
            if self.connections.load(Ordering::SeqCst) >= max {
                warn!(
                    "Connection limit ({}) reached, dropping connection from {}",
                    max, peer
                );
                drop(stream);
                return;
            }
        }

        let guard = ConnectionGuard::new(Arc::clone(&self.connections));
        let transport = Arc::clone(&self.transport);
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = serve(transport.as_ref(), &handler, stream, peer).await {
                warn!("Error: {:#}", e);
            }
        });
    }
}

/// Run one client connection to completion
async fn serve(
    transport: &dyn Transport,
    handler: &ConnectionHandler,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    debug!("New connection from {}", peer);

    let local = stream.local_addr()?;
    let stream = transport.handshake(stream).await?;
    let conn = Connection::new(stream, peer, local);

    match handler.handle(conn).await? {
        Outcome::Intercepted(request, conn) => {
            if let Some(observer) = handler.observer() {
                observer.on_intercept(request, conn).await;
            }
        }
        Outcome::Proxied | Outcome::Closed => {}
    }

    debug!("Connection from {} finished", peer);
    Ok(())
}
