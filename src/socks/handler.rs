//! SOCKS5 connection handler
//!
//! Drives one client connection through greeting, authentication and request,
//! then applies the policy decision and runs the matching executor.

use super::auth::{authenticate, AuthRegistry};
use super::bind::{handle_bind, BindOptions};
use super::connect::{handle_connect, ConnectOptions};
use super::connection::Connection;
use super::parser::ParseEvent;
use super::reply::UNSPECIFIED_BIND_ADDR;
use super::resolve::{Resolver, SystemResolver};
use super::types::{Request, SocksCommand};
use crate::error::{ReplyCode, Socks5Error};
use crate::transport::StreamDyn;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Decision taken for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Serve the request; with `intercept` the caller takes the raw stream
    Accept {
        /// Hand the connection to the observer instead of relaying
        intercept: bool,
    },
    /// Refuse with DISALLOW
    Deny,
}

const UNDECIDED: u8 = 0;
const ACCEPT: u8 = 1;
const INTERCEPT: u8 = 2;
const DENY: u8 = 3;

impl Verdict {
    fn encode(self) -> u8 {
        match self {
            Verdict::Accept { intercept: false } => ACCEPT,
            Verdict::Accept { intercept: true } => INTERCEPT,
            Verdict::Deny => DENY,
        }
    }

    fn decode(value: u8) -> Option<Self> {
        match value {
            ACCEPT => Some(Verdict::Accept { intercept: false }),
            INTERCEPT => Some(Verdict::Accept { intercept: true }),
            DENY => Some(Verdict::Deny),
            _ => None,
        }
    }
}

/// One-shot latch for the accept/deny decision of a request
///
/// The first call wins; later calls are ignored unless forced.
#[derive(Debug, Default)]
pub struct Decision {
    state: AtomicU8,
}

impl Decision {
    /// Create an undecided latch
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the request; returns `false` if a decision was already taken
    pub fn accept(&self, intercept: bool) -> bool {
        self.latch(Verdict::Accept { intercept })
    }

    /// Deny the request; returns `false` if a decision was already taken
    pub fn deny(&self) -> bool {
        self.latch(Verdict::Deny)
    }

    /// Replace any earlier decision
    pub fn force(&self, verdict: Verdict) {
        self.state.store(verdict.encode(), Ordering::SeqCst);
    }

    /// The decision taken so far
    pub fn verdict(&self) -> Option<Verdict> {
        Verdict::decode(self.state.load(Ordering::SeqCst))
    }

    fn latch(&self, verdict: Verdict) -> bool {
        self.state
            .compare_exchange(UNDECIDED, verdict.encode(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// External policy hook consulted for every request
#[async_trait]
pub trait ConnectionObserver: Send + Sync + Debug {
    /// Decide on `request` by calling [`Decision::accept`] or [`Decision::deny`].
    ///
    /// Returning without a decision denies the request.
    async fn on_request(&self, request: &Request, decision: &Decision);

    /// Take over an intercepted connection
    ///
    /// Called after the SUCCESS reply was written. The observer owns the
    /// connection from here on; the default implementation closes it.
    async fn on_intercept(&self, request: Request, connection: Connection<Box<dyn StreamDyn>>) {
        debug!("Closing intercepted connection to {}", request.destination);
        connection.close().await;
    }
}

/// How a handled connection ended
pub enum Outcome<S> {
    /// Served by an executor, or refused with a reply
    Proxied,
    /// Accepted with interception; the caller owns the connection
    Intercepted(Request, Connection<S>),
    /// Dropped during greeting, authentication or request parsing
    Closed,
}

impl<S> Debug for Outcome<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Proxied => write!(f, "Proxied"),
            Outcome::Intercepted(request, _) => f.debug_tuple("Intercepted").field(request).finish(),
            Outcome::Closed => write!(f, "Closed"),
        }
    }
}

/// Per-connection protocol driver, shared by all connections of a server
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    auth: Arc<AuthRegistry>,
    bind: BindOptions,
    connect: ConnectOptions,
    resolver: Arc<dyn Resolver>,
    observer: Option<Arc<dyn ConnectionObserver>>,
}

impl ConnectionHandler {
    /// Create a handler with the system resolver and no observer
    pub fn new(auth: AuthRegistry, bind: BindOptions) -> Self {
        ConnectionHandler {
            auth: Arc::new(auth),
            bind,
            connect: ConnectOptions::default(),
            resolver: Arc::new(SystemResolver),
            observer: None,
        }
    }

    /// Consult `observer` for every request
    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Resolve CONNECT destinations with `resolver`
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set outbound connection settings
    pub fn with_connect_options(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    /// The observer, if any
    pub fn observer(&self) -> Option<&Arc<dyn ConnectionObserver>> {
        self.observer.as_ref()
    }

    /// Serve one client connection to completion
    ///
    /// Protocol errors and failed authentication drop the connection without
    /// any reply and yield [`Outcome::Closed`]. An `Err` is only returned for
    /// I/O failures while replying.
    pub async fn handle<S>(&self, mut conn: Connection<S>) -> Result<Outcome<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = conn.peer_addr();

        let offered = match conn.next_event().await {
            Ok(ParseEvent::Methods(methods)) => methods,
            Ok(ParseEvent::Request(_)) => {
                debug!("Unexpected request before greeting from {}", peer);
                return Ok(Outcome::Closed);
            }
            Err(e) => {
                debug!("Dropping {}: {}", peer, e);
                return Ok(Outcome::Closed);
            }
        };

        let context = match authenticate(&mut conn, &self.auth, &offered).await {
            Ok(context) => context,
            Err(Socks5Error::NoAcceptableMethod) => {
                debug!("No acceptable auth method for {}", peer);
                conn.close().await;
                return Ok(Outcome::Closed);
            }
            Err(e) => {
                debug!("Authentication of {} failed: {}", peer, e);
                return Ok(Outcome::Closed);
            }
        };
        conn.set_authenticated(context);
        conn.start_requests();

        let raw = match conn.next_event().await {
            Ok(ParseEvent::Request(raw)) => raw,
            Ok(ParseEvent::Methods(_)) => {
                debug!("Unexpected greeting instead of request from {}", peer);
                return Ok(Outcome::Closed);
            }
            Err(e) => {
                debug!("Dropping {}: {}", peer, e);
                return Ok(Outcome::Closed);
            }
        };

        let command = match SocksCommand::from_byte(raw.command) {
            Some(command) => command,
            None => {
                info!("Unsupported command {:#04x} from {}", raw.command, peer);
                conn.reply(ReplyCode::CommandNotSupported, UNSPECIFIED_BIND_ADDR)
                    .await
                    .context("Failed to send command not supported reply")?;
                conn.close().await;
                return Ok(Outcome::Proxied);
            }
        };

        let request = Request {
            command,
            destination: raw.destination,
            source: peer,
            auth: conn.auth_context().clone(),
        };

        let verdict = match &self.observer {
            None => Verdict::Accept { intercept: false },
            Some(observer) => {
                let decision = Decision::new();
                observer.on_request(&request, &decision).await;
                decision.verdict().unwrap_or(Verdict::Deny)
            }
        };

        match verdict {
            Verdict::Deny => {
                info!(
                    "Denied {} to {} (from = {}) (user = {})",
                    request.command,
                    request.destination,
                    request.source,
                    request.user()
                );
                conn.reply(ReplyCode::ConnectionNotAllowed, UNSPECIFIED_BIND_ADDR)
                    .await
                    .context("Failed to send denial reply")?;
                conn.close().await;
                Ok(Outcome::Proxied)
            }
            Verdict::Accept { intercept: true } => {
                debug!(
                    "Intercepting {} to {} (from = {})",
                    request.command, request.destination, request.source
                );
                conn.reply(ReplyCode::Succeeded, UNSPECIFIED_BIND_ADDR)
                    .await
                    .context("Failed to send intercept reply")?;
                Ok(Outcome::Intercepted(request, conn))
            }
            Verdict::Accept { intercept: false } => {
                match request.command {
                    SocksCommand::Connect => {
                        handle_connect(conn, &request, self.resolver.as_ref(), &self.connect).await?
                    }
                    SocksCommand::Bind => handle_bind(conn, &request, &self.bind).await?,
                }
                Ok(Outcome::Proxied)
            }
        }
    }
}
