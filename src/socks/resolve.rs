//! Destination name resolution
//!
//! The executors only see the [`Resolver`] trait. [`SystemResolver`] uses the
//! operating system's resolver through tokio.

use super::types::TargetAddr;
use crate::error::LookupError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::{IpAddr, SocketAddr};

/// Asynchronous name to address lookup
#[async_trait]
pub trait Resolver: Send + Sync + Debug {
    /// Resolve `host` to a single address
    async fn lookup(&self, host: &str) -> Result<IpAddr, LookupError>;
}

/// Resolver backed by `getaddrinfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<IpAddr, LookupError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| classify_lookup_error(host, e))?;

        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| LookupError::NotFound(host.to_string()))
    }
}

/// getaddrinfo messages meaning the name has no address
const NO_SUCH_NAME: &[&str] = &[
    "Name or service not known",
    "No address associated with hostname",
    "nodename nor servname provided",
    "No such host is known",
];

/// Sort a failed lookup into the [`LookupError`] variants
///
/// getaddrinfo failures carry no portable error kind, so a missing name is
/// recognised by its message. Transient and other resolver failures stay `Io`.
fn classify_lookup_error(host: &str, err: io::Error) -> LookupError {
    if err.kind() == io::ErrorKind::TimedOut {
        return LookupError::TimedOut(host.to_string());
    }
    let message = err.to_string();
    if err.kind() == io::ErrorKind::NotFound || NO_SUCH_NAME.iter().any(|m| message.contains(m)) {
        LookupError::NotFound(format!("{}: {}", host, message))
    } else {
        tracing::debug!("Lookup of {} failed: {}", host, message);
        LookupError::Io(err)
    }
}

/// Resolve a request destination to a socket address
///
/// IP destinations are returned as is without consulting the resolver.
pub async fn resolve_target(
    resolver: &dyn Resolver,
    target: &TargetAddr,
) -> Result<SocketAddr, LookupError> {
    match target {
        TargetAddr::Ip(addr) => Ok(*addr),
        TargetAddr::Domain(host, port) => {
            let ip = resolver.lookup(host).await?;
            Ok(SocketAddr::new(ip, *port))
        }
    }
}
