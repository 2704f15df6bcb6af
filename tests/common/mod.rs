//! Test utilities and mocks for Socksd
//!
//! This module provides a minimal SOCKS5 client, a loopback server harness and
//! observers used across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use socksd::socks::{
    AuthRegistry, BindOptions, Connection, ConnectionHandler, ConnectionObserver, Decision,
    NoAuth, Request, Verdict,
};
use socksd::socks::consts::*;
use socksd::transport::{SocketOpts, StreamDyn, TcpTransport, Transport};
use socksd::{ReplyCode, Server};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Upper bound for any single read in the tests
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A port that was free when this returned
pub async fn free_port() -> u16 {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr.port()
}

/// A server running on loopback; shut down when dropped
pub struct TestServer {
    /// Address clients connect to
    pub addr: SocketAddr,
    /// The running server
    pub server: Arc<Server>,
    shutdown: broadcast::Sender<bool>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Start `handler` on an ephemeral loopback port
pub async fn start_server(handler: ConnectionHandler, max_connections: Option<usize>) -> TestServer {
    let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), SocketOpts::default())
        .await
        .unwrap();
    start_server_on(Box::new(transport), handler, max_connections)
}

/// Run `handler` behind an already bound transport
pub fn start_server_on(
    transport: Box<dyn Transport>,
    handler: ConnectionHandler,
    max_connections: Option<usize>,
) -> TestServer {
    let server = Arc::new(Server::new(transport, handler).with_max_connections(max_connections));
    let addr = server.local_addr().unwrap();

    let (shutdown, rx) = broadcast::channel(1);
    let runner = Arc::clone(&server);
    tokio::spawn(async move { runner.run(rx).await });

    TestServer {
        addr,
        server,
        shutdown,
    }
}

/// Registry with only the no-auth method
pub fn no_auth_registry() -> AuthRegistry {
    let mut registry = AuthRegistry::new();
    registry.register(Arc::new(NoAuth)).unwrap();
    registry
}

/// BIND options on loopback with the given wait
pub fn bind_options(max_wait: Duration) -> BindOptions {
    BindOptions {
        max_wait,
        ..Default::default()
    }
}

/// Handler with no-auth and default BIND options
pub fn default_handler() -> ConnectionHandler {
    ConnectionHandler::new(no_auth_registry(), BindOptions::default())
}

/// Minimal SOCKS5 client
pub mod client {
    use super::*;

    /// Send a greeting and return the method selection reply
    pub async fn greet<S>(stream: &mut S, methods: &[u8]) -> [u8; 2]
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut greeting = vec![SOCKS5_VERSION, methods.len() as u8];
        greeting.extend_from_slice(methods);
        stream.write_all(&greeting).await.unwrap();

        let mut reply = [0u8; 2];
        tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        reply
    }

    /// Connect to `server` and complete a no-auth greeting
    pub async fn connect(server: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(server).await.unwrap();
        assert_eq!(greet(&mut stream, &[SOCKS5_AUTH_METHOD_NONE]).await, [0x05, 0x00]);
        stream
    }

    /// RFC 1929 sub-negotiation; returns the status byte
    pub async fn login<S>(stream: &mut S, username: &str, password: &str) -> u8
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frame = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        frame.extend_from_slice(username.as_bytes());
        frame.push(password.len() as u8);
        frame.extend_from_slice(password.as_bytes());
        stream.write_all(&frame).await.unwrap();

        let mut reply = [0u8; 2];
        tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply[0], SOCKS5_AUTH_VERSION);
        reply[1]
    }

    /// Request frame for an IP destination
    pub fn request_frame(command: u8, target: SocketAddr) -> Vec<u8> {
        let mut frame = vec![SOCKS5_VERSION, command, SOCKS5_RESERVED];
        match target.ip() {
            IpAddr::V4(ip) => {
                frame.push(SOCKS5_ADDR_TYPE_IPV4);
                frame.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                frame.push(SOCKS5_ADDR_TYPE_IPV6);
                frame.extend_from_slice(&ip.octets());
            }
        }
        frame.extend_from_slice(&target.port().to_be_bytes());
        frame
    }

    /// Request frame for a domain destination
    pub fn domain_request_frame(command: u8, domain: &str, port: u16) -> Vec<u8> {
        let mut frame = vec![
            SOCKS5_VERSION,
            command,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        frame.extend_from_slice(domain.as_bytes());
        frame.extend_from_slice(&port.to_be_bytes());
        frame
    }

    /// BIND request asking for `port` on any address
    pub fn bind_frame(port: u16) -> Vec<u8> {
        request_frame(
            SOCKS5_CMD_TCP_BIND,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        )
    }

    /// Read one reply frame; returns the reply code and bound address
    pub async fn read_reply<S: AsyncRead + Unpin>(stream: &mut S) -> (ReplyCode, SocketAddr) {
        tokio::time::timeout(READ_TIMEOUT, read_reply_inner(stream))
            .await
            .unwrap()
    }

    async fn read_reply_inner<S: AsyncRead + Unpin>(stream: &mut S) -> (ReplyCode, SocketAddr) {
        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await.unwrap();
        assert_eq!(head[0], SOCKS5_VERSION);
        assert_eq!(head[2], SOCKS5_RESERVED);

        let ip = match head[3] {
            SOCKS5_ADDR_TYPE_IPV4 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await.unwrap();
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            SOCKS5_ADDR_TYPE_IPV6 => {
                let mut octets = [0u8; 16];
                stream.read_exact(&mut octets).await.unwrap();
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => panic!("unexpected address type in reply: {}", other),
        };
        let mut port = [0u8; 2];
        stream.read_exact(&mut port).await.unwrap();
        let code = ReplyCode::try_from(head[1]).unwrap();
        (code, SocketAddr::new(ip, u16::from_be_bytes(port)))
    }

    /// Everything the server still sends before closing
    pub async fn read_to_close<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
        let mut rest = Vec::new();
        let result = tokio::time::timeout(READ_TIMEOUT, stream.read_to_end(&mut rest))
            .await
            .unwrap();
        // A reset after the last byte counts as closed too
        if let Err(e) = result {
            assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset, "{}", e);
        }
        rest
    }
}

/// Observer that applies a fixed verdict and counts requests
#[derive(Debug)]
pub struct CountingObserver {
    verdict: Option<Verdict>,
    requests: AtomicUsize,
    seen: Mutex<Vec<Request>>,
}

impl CountingObserver {
    /// Observer answering every request with `verdict`; `None` decides nothing
    pub fn new(verdict: Option<Verdict>) -> Self {
        CountingObserver {
            verdict,
            requests: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Transparent proxy
    pub fn accepting() -> Self {
        Self::new(Some(Verdict::Accept { intercept: false }))
    }

    /// Number of requests observed
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Requests observed so far
    pub fn seen(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionObserver for CountingObserver {
    async fn on_request(&self, request: &Request, decision: &Decision) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        match self.verdict {
            Some(Verdict::Accept { intercept }) => {
                decision.accept(intercept);
            }
            Some(Verdict::Deny) => {
                decision.deny();
            }
            None => {}
        }
    }

    async fn on_intercept(&self, _request: Request, mut connection: Connection<Box<dyn StreamDyn>>) {
        // Echo one line back to show the raw stream changed hands
        let mut buf = [0u8; 5];
        if connection.read_exact(&mut buf).await.is_ok() {
            let _ = connection.write_all(b"intercepted:").await;
            let _ = connection.write_all(&buf).await;
        }
        connection.close().await;
    }
}
