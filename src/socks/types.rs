//! SOCKS5 type definitions
//!
//! Defines the core types used in SOCKS5 request handling.

use super::auth::AuthContext;
use super::consts::*;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// SOCKS5 commands served by this server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// TCP CONNECT - establish a TCP connection to target
    Connect,
    /// TCP BIND - listen and wait for an inbound peer
    Bind,
}

impl SocksCommand {
    /// Parse a command byte into SocksCommand
    ///
    /// UDP ASSOCIATE and unknown bytes both map to `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            _ => None,
        }
    }

    /// Convert SocksCommand to byte
    pub fn to_byte(self) -> u8 {
        match self {
            SocksCommand::Connect => SOCKS5_CMD_TCP_CONNECT,
            SocksCommand::Bind => SOCKS5_CMD_TCP_BIND,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "connect"),
            SocksCommand::Bind => write!(f, "bind"),
        }
    }
}

/// Address type of a request destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    /// IPv4 address
    Ipv4,
    /// IPv6 address
    Ipv6,
    /// Domain name
    Domain,
}

impl AddrType {
    /// Get the address type byte for SOCKS5 protocol
    pub fn to_byte(self) -> u8 {
        match self {
            AddrType::Ipv4 => SOCKS5_ADDR_TYPE_IPV4,
            AddrType::Ipv6 => SOCKS5_ADDR_TYPE_IPV6,
            AddrType::Domain => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }
}

/// Target address for SOCKS5 requests
///
/// Represents the destination address in a SOCKS5 request.
/// Can be an IP address (v4 or v6) or a domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a new TargetAddr from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a new TargetAddr from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a new TargetAddr from a domain name and port
    pub fn domain(domain: String, port: u16) -> Self {
        TargetAddr::Domain(domain, port)
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Host part without the port
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(domain, _) => domain.clone(),
        }
    }

    /// Get the address type
    pub fn addr_type(&self) -> AddrType {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => AddrType::Ipv4,
            TargetAddr::Ip(SocketAddr::V6(_)) => AddrType::Ipv6,
            TargetAddr::Domain(_, _) => AddrType::Domain,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

/// A parsed client request
///
/// Immutable once built: the command and destination come from the wire,
/// the source address and auth context are attached by the connection handler.
#[derive(Debug, Clone)]
pub struct Request {
    /// Requested command
    pub command: SocksCommand,
    /// Destination address and port
    pub destination: TargetAddr,
    /// Client address and port
    pub source: SocketAddr,
    /// Context produced by the winning auth handler
    pub auth: AuthContext,
}

impl Request {
    /// Address type of the destination
    pub fn addr_type(&self) -> AddrType {
        self.destination.addr_type()
    }

    /// Destination port as requested by the client
    pub fn dst_port(&self) -> u16 {
        self.destination.port()
    }

    /// Authenticated user name, or `-` when the method carries none
    pub fn user(&self) -> &str {
        self.auth.user().unwrap_or("-")
    }
}
