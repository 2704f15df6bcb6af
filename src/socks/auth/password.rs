//! Username/password authentication handler
//!
//! Implements RFC 1929 username/password authentication for SOCKS5.

use super::{AuthContext, AuthHandler, AuthOutcome, AuthStream};
use crate::config::UserConfig;
use crate::socks::consts::{SOCKS5_AUTH_METHOD_PASSWORD, SOCKS5_AUTH_VERSION};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Authentication result codes
const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;

/// Decides whether a username/password pair is valid
#[async_trait]
pub trait CredentialValidator: Send + Sync + Debug {
    /// Returns the context for the user, or `None` to reject
    async fn validate(&self, username: &str, password: &str) -> Option<AuthContext>;
}

#[derive(Debug, Clone)]
struct UserEntry {
    password: String,
    bind_port: Option<u16>,
}

/// Validator backed by the `[[auth.users]]` table of the configuration
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    users: HashMap<String, UserEntry>,
}

impl StaticUsers {
    /// Build from configured users
    pub fn from_config(users: &[UserConfig]) -> Self {
        let users = users
            .iter()
            .map(|u| {
                (
                    u.username.clone(),
                    UserEntry {
                        password: u.password.clone(),
                        bind_port: u.bind_port,
                    },
                )
            })
            .collect();
        StaticUsers { users }
    }

    /// Add a single user
    pub fn with_user(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        bind_port: Option<u16>,
    ) -> Self {
        self.users.insert(
            username.into(),
            UserEntry {
                password: password.into(),
                bind_port,
            },
        );
        self
    }
}

#[async_trait]
impl CredentialValidator for StaticUsers {
    async fn validate(&self, username: &str, password: &str) -> Option<AuthContext> {
        let entry = self.users.get(username)?;
        if entry.password != password {
            return None;
        }
        let context = AuthContext::for_user(username);
        Some(match entry.bind_port {
            Some(port) => context.with_bind_port(port),
            None => context,
        })
    }
}

/// Username/password authentication handler (method `0x02`)
#[derive(Debug, Clone)]
pub struct UserPassword {
    validator: Arc<dyn CredentialValidator>,
}

impl UserPassword {
    /// Create a handler checking credentials with `validator`
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        UserPassword { validator }
    }
}

#[async_trait]
impl AuthHandler for UserPassword {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_PASSWORD
    }

    /// # Protocol
    ///
    /// Client sends:
    /// ```text
    /// +----+------+----------+------+----------+
    /// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    /// +----+------+----------+------+----------+
    /// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    /// +----+------+----------+------+----------+
    /// ```
    ///
    /// Server responds:
    /// ```text
    /// +----+--------+
    /// |VER | STATUS |
    /// +----+--------+
    /// | 1  |   1    |
    /// +----+--------+
    /// ```
    async fn negotiate(&self, stream: &mut dyn AuthStream) -> Result<AuthOutcome> {
        let (username, password) = read_credentials(stream).await?;

        match self.validator.validate(&username, &password).await {
            Some(context) => {
                send_auth_result(stream, AUTH_SUCCESS).await?;
                tracing::debug!("Authentication successful for user: {}", username);
                Ok(AuthOutcome::Accepted(context))
            }
            None => {
                send_auth_result(stream, AUTH_FAILURE).await?;
                tracing::info!("Authentication failed for user: {}", username);
                Ok(AuthOutcome::Rejected)
            }
        }
    }
}

/// Read the RFC 1929 request, answering malformed ones with a failure status
async fn read_credentials<S>(stream: &mut S) -> Result<(String, String)>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    // Read version and username length
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    let version = buf[0];
    let username_len = buf[1] as usize;

    if version != SOCKS5_AUTH_VERSION {
        send_auth_result(stream, AUTH_FAILURE).await?;
        bail!("Invalid auth version: {}", version);
    }

    if username_len == 0 {
        send_auth_result(stream, AUTH_FAILURE).await?;
        bail!("Invalid username length: {}", username_len);
    }

    let mut username = vec![0u8; username_len];
    stream.read_exact(&mut username).await?;

    let mut buf = [0u8; 1];
    stream.read_exact(&mut buf).await?;
    let password_len = buf[0] as usize;

    if password_len == 0 {
        send_auth_result(stream, AUTH_FAILURE).await?;
        bail!("Invalid password length: {}", password_len);
    }

    let mut password = vec![0u8; password_len];
    stream.read_exact(&mut password).await?;

    Ok((String::from_utf8(username)?, String::from_utf8(password)?))
}

/// Send authentication result to client
async fn send_auth_result<S>(stream: &mut S, status: u8) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(&[SOCKS5_AUTH_VERSION, status]).await?;
    stream.flush().await?;
    Ok(())
}
