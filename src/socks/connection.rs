//! Per-client connection state
//!
//! [`Connection`] wraps one accepted stream together with its parser. Bytes
//! the parser read past the end of a frame are kept and served first by the
//! connection's own [`AsyncRead`] implementation, so auth handlers, relays and
//! intercepting observers see the exact client byte stream.

use super::auth::AuthContext;
use super::consts::PARSE_CHUNK_SIZE;
use super::parser::{ParseEvent, Parser};
use super::reply::write_reply;
use crate::error::{ReplyCode, Socks5Error};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

/// One accepted client stream and its protocol state
pub struct Connection<S> {
    stream: S,
    /// Client bytes received but not yet consumed
    pending: BytesMut,
    parser: Parser,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    authenticated: bool,
    auth_context: AuthContext,
    /// Latched by the first final reply
    handled: bool,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("parser", &self.parser.state())
            .field("pending", &self.pending.len())
            .field("authenticated", &self.authenticated)
            .field("handled", &self.handled)
            .finish()
    }
}

impl<S> Connection<S> {
    /// Wrap a freshly accepted stream
    pub fn new(stream: S, peer_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Connection {
            stream,
            pending: BytesMut::new(),
            parser: Parser::new(),
            peer_addr,
            local_addr,
            authenticated: false,
            auth_context: AuthContext::default(),
            handled: false,
        }
    }

    /// Client address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Server-side address of the client stream
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True once an auth handler accepted the client
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Context stored by the winning auth handler
    pub fn auth_context(&self) -> &AuthContext {
        &self.auth_context
    }

    /// Record a successful handshake
    pub fn set_authenticated(&mut self, context: AuthContext) {
        self.authenticated = true;
        self.auth_context = context;
    }

    /// True once a final reply was written
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Expect a greeting next
    pub fn start_methods(&mut self) {
        self.parser.start_methods();
    }

    /// Expect a request next
    pub fn start_requests(&mut self) {
        self.parser.start_requests();
    }

    /// Number of buffered client bytes not yet handed out
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Release the stream along with any buffered client bytes
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.stream, self.pending)
    }

    /// Give the bytes the parser did not consume back to the pending buffer
    fn reclaim_unparsed(&mut self) {
        let mut rest = self.parser.take_unparsed();
        if rest.is_empty() {
            return;
        }
        rest.extend_from_slice(&self.pending);
        self.pending = rest;
    }
}

impl<S: AsyncRead + Unpin> Connection<S> {
    /// Read until the parser emits its next event
    ///
    /// Fails on malformed input, on end of stream in the middle of a frame, and
    /// when the parser is suspended or done.
    pub async fn next_event(&mut self) -> Result<ParseEvent, Socks5Error> {
        let mut chunk = [0u8; PARSE_CHUNK_SIZE];
        loop {
            if let Some(event) = self.parser.next_event()? {
                self.reclaim_unparsed();
                return Ok(event);
            }
            if self.parser.is_idle() {
                return Err(self.parser.idle_error());
            }

            if !self.pending.is_empty() {
                let data = self.pending.split();
                self.parser.feed(&data);
                continue;
            }

            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Socks5Error::UnexpectedEof);
            }
            self.parser.feed(&chunk[..n]);
        }
    }

    /// Buffer more client bytes without consuming them
    ///
    /// Returns the number of bytes read; `0` means the client closed its side.
    /// Cancel safe.
    pub async fn read_ahead(&mut self) -> io::Result<usize> {
        self.pending.reserve(PARSE_CHUNK_SIZE);
        self.stream.read_buf(&mut self.pending).await
    }
}

impl<S: AsyncWrite + Unpin> Connection<S> {
    /// Write a final reply, latching the handled flag
    ///
    /// Returns `false` without writing anything when a final reply was
    /// already sent.
    pub async fn reply(&mut self, code: ReplyCode, bind_addr: SocketAddr) -> io::Result<bool> {
        if self.handled {
            debug!(
                "Dropping second reply {:?} to {}: request already handled",
                code, self.peer_addr
            );
            return Ok(false);
        }
        self.handled = true;
        write_reply(&mut self.stream, code, bind_addr).await?;
        Ok(true)
    }

    /// Write the first-stage BIND reply, which does not conclude the request
    pub async fn reply_interim(&mut self, bind_addr: SocketAddr) -> io::Result<()> {
        write_reply(&mut self.stream, ReplyCode::Succeeded, bind_addr).await
    }

    /// Gracefully end the client stream
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error closing connection from {}: {}", self.peer_addr, e);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Connection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.pending.is_empty() {
            let n = std::cmp::min(buf.remaining(), this.pending.len());
            buf.put_slice(&this.pending.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Connection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
