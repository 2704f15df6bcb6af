//! TCP CONNECT executor
//!
//! Resolves the destination, connects to it and relays data bidirectionally.

use super::connection::Connection;
use super::relay::relay;
use super::reply::UNSPECIFIED_BIND_ADDR;
use super::resolve::{resolve_target, Resolver};
use super::types::Request;
use crate::error::ReplyCode;
use crate::helper::DEFAULT_CONNECT_TIMEOUT_MS;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Outbound connection settings
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Limit on establishing the destination connection
    pub timeout: Duration,
    /// Set TCP_NODELAY on the destination socket
    pub nodelay: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            nodelay: false,
        }
    }
}

/// Handle TCP CONNECT command
///
/// This function:
/// 1. Resolves the target address
/// 2. Establishes a TCP connection to the target
/// 3. Sends a success reply carrying the local end of that connection
/// 4. Relays data bidirectionally between client and target
///
/// Resolution and connect failures are answered with the mapped reply code
/// and end the connection; they are not returned as errors.
pub async fn handle_connect<S>(
    mut conn: Connection<S>,
    request: &Request,
    resolver: &dyn Resolver,
    opts: &ConnectOptions,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    info!(
        "Connecting to {} (from = {}) (user = {})",
        request.destination,
        request.source,
        request.user()
    );

    let socket_addr = match resolve_target(resolver, &request.destination).await {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Failed to resolve {}: {}", request.destination, e);
            return fail(conn, ReplyCode::from(&e)).await;
        }
    };

    debug!("Connecting to target: {}", socket_addr);

    let target = match tokio::time::timeout(opts.timeout, TcpStream::connect(socket_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("Failed to connect to {}: {}", socket_addr, e);
            return fail(conn, ReplyCode::from(&e)).await;
        }
        Err(_) => {
            warn!("Connection timeout to {}", socket_addr);
            return fail(conn, ReplyCode::HostUnreachable).await;
        }
    };

    if opts.nodelay {
        if let Err(e) = target.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
    }

    let bound = target
        .local_addr()
        .with_context(|| format!("Failed to read local address of {}", socket_addr))?;

    conn.reply(ReplyCode::Succeeded, bound)
        .await
        .with_context(|| format!("Failed to send reply to {}", request.source))?;

    info!(
        "Connected to {} via {} (from = {})",
        socket_addr, bound, request.source
    );

    let stats = relay(conn, target).await;
    info!(
        "Connection to {} closed (from = {}) ({} bytes sent, {} bytes received)",
        request.destination, request.source, stats.a_to_b, stats.b_to_a
    );

    Ok(())
}

/// Send a failure reply and end the connection
async fn fail<S>(mut conn: Connection<S>, code: ReplyCode) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    conn.reply(code, UNSPECIFIED_BIND_ADDR)
        .await
        .context("Failed to send failure reply")?;
    conn.close().await;
    Ok(())
}
