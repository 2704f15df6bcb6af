//! SOCKS5 authentication
//!
//! Authentication methods are plugins implementing [`AuthHandler`]. They are
//! kept in an [`AuthRegistry`] whose registration order is the server's
//! preference order. [`authenticate`] runs method selection and exactly one
//! handshake for a greeting.

mod none;
mod password;

pub use none::NoAuth;
pub use password::{CredentialValidator, StaticUsers, UserPassword};

use super::consts::*;
use super::reply::encode_method_selection;
use crate::config::{AuthConfig, AuthMethodName};
use crate::error::Socks5Error;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Stream handed to auth handlers for their sub-negotiation
pub trait AuthStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AuthStream for T {}

/// Called when a BIND listener cannot be opened because its port is taken.
///
/// Returns the next port to try, or `None` to abandon the request.
pub trait BindConflictHook: Send + Sync + Debug {
    /// Pick a replacement for `port`
    fn on_conflict(&self, port: u16, error: &io::Error) -> Option<u16>;
}

/// Opaque per-connection state produced by the winning auth handler
#[derive(Clone, Default)]
pub struct AuthContext {
    user: Option<String>,
    bind_port: Option<u16>,
    bind_conflict: Option<Arc<dyn BindConflictHook>>,
    bind_retries: Arc<AtomicU32>,
}

impl Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("user", &self.user)
            .field("bind_port", &self.bind_port)
            .field("bind_conflict", &self.bind_conflict.is_some())
            .field("bind_retries", &self.bind_retries())
            .finish()
    }
}

impl AuthContext {
    /// Empty context, as produced by the no-auth method
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for an authenticated user
    pub fn for_user(user: impl Into<String>) -> Self {
        AuthContext {
            user: Some(user.into()),
            ..Default::default()
        }
    }

    /// Pin every BIND of this connection to `port`
    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = Some(port);
        self
    }

    /// Delegate BIND port conflicts to `hook`
    pub fn with_bind_conflict_hook(mut self, hook: Arc<dyn BindConflictHook>) -> Self {
        self.bind_conflict = Some(hook);
        self
    }

    /// Authenticated user name
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Fixed BIND port override
    pub fn bind_port(&self) -> Option<u16> {
        self.bind_port
    }

    /// Conflict hook, when the handler supplied one
    pub fn bind_conflict_hook(&self) -> Option<&Arc<dyn BindConflictHook>> {
        self.bind_conflict.as_ref()
    }

    /// Delegated conflict retries so far
    pub fn bind_retries(&self) -> u32 {
        self.bind_retries.load(Ordering::SeqCst)
    }

    /// Count one more delegated retry and return the new total
    pub fn record_bind_retry(&self) -> u32 {
        self.bind_retries.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Result of a handshake that ran to completion
#[derive(Debug)]
pub enum AuthOutcome {
    /// The client is authenticated
    Accepted(AuthContext),
    /// Credentials were refused
    Rejected,
}

/// An authentication method plugin
#[async_trait]
pub trait AuthHandler: Send + Sync + Debug {
    /// Method id announced in the method selection reply
    fn method(&self) -> u8;

    /// Run the method-specific sub-negotiation on the client stream.
    ///
    /// Called after the server has already written `VER METHOD`.
    async fn negotiate(&self, stream: &mut dyn AuthStream) -> Result<AuthOutcome>;
}

/// Ordered set of authentication handlers
#[derive(Debug, Default, Clone)]
pub struct AuthRegistry {
    handlers: Vec<Arc<dyn AuthHandler>>,
}

impl AuthRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry described by the `[auth]` configuration section
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let mut registry = AuthRegistry::new();
        for method in &config.methods {
            let handler: Arc<dyn AuthHandler> = match method {
                AuthMethodName::None => Arc::new(NoAuth),
                AuthMethodName::Password => Arc::new(UserPassword::new(Arc::new(
                    StaticUsers::from_config(&config.users),
                ))),
            };
            registry.register(handler)?;
        }
        Ok(registry)
    }

    /// Append a handler; its position is its preference rank
    pub fn register(&mut self, handler: Arc<dyn AuthHandler>) -> Result<&mut Self, Socks5Error> {
        if self.handlers.len() >= MAX_AUTH_HANDLERS {
            return Err(Socks5Error::TooManyAuthHandlers);
        }
        let method = handler.method();
        if self.handlers.iter().any(|h| h.method() == method) {
            return Err(Socks5Error::DuplicateAuthMethod(method));
        }
        self.handlers.push(handler);
        Ok(self)
    }

    /// Select the first registered handler whose method the client offered.
    ///
    /// The client's ordering of `offered` does not matter.
    pub fn select(&self, offered: &[u8]) -> Option<&Arc<dyn AuthHandler>> {
        self.handlers.iter().find(|h| offered.contains(&h.method()))
    }

    /// Registered method ids in preference order
    pub fn methods(&self) -> Vec<u8> {
        self.handlers.iter().map(|h| h.method()).collect()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Select a method for `offered` and run its handshake
///
/// Writes `05 FF` and fails with [`Socks5Error::NoAcceptableMethod`] when no
/// registered method was offered. A rejected or failed handshake yields
/// [`Socks5Error::AuthFailed`]; handshake errors are logged, never sent.
pub async fn authenticate<S>(
    stream: &mut S,
    registry: &AuthRegistry,
    offered: &[u8],
) -> Result<AuthContext, Socks5Error>
where
    S: AuthStream,
{
    let handler = match registry.select(offered) {
        Some(handler) => Arc::clone(handler),
        None => {
            debug!("No acceptable method among {:?}", offered);
            stream
                .write_all(&encode_method_selection(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE))
                .await?;
            stream.flush().await?;
            return Err(Socks5Error::NoAcceptableMethod);
        }
    };

    stream
        .write_all(&encode_method_selection(handler.method()))
        .await?;
    stream.flush().await?;

    match handler.negotiate(stream).await {
        Ok(AuthOutcome::Accepted(context)) => {
            debug!("Authentication succeeded with method {:#04x}", handler.method());
            Ok(context)
        }
        Ok(AuthOutcome::Rejected) => {
            debug!("Authentication rejected by method {:#04x}", handler.method());
            Err(Socks5Error::AuthFailed)
        }
        Err(e) => {
            warn!("Error: {:#}", e);
            Err(Socks5Error::AuthFailed)
        }
    }
}
