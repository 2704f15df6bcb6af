//! SOCKS5 greeting and request parser
//!
//! A resumable state machine over raw bytes. It never touches a socket:
//! callers [`feed`](Parser::feed) whatever they read and pull
//! [`ParseEvent`]s out with [`next_event`](Parser::next_event).
//!
//! # Frames
//!
//! ```text
//! greeting: +----+----------+----------+
//!           |VER | NMETHODS | METHODS  |
//!           | 1  |    1     | 1 to 255 |
//!           +----+----------+----------+
//!
//! request:  +----+-----+-------+------+----------+----------+
//!           |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//!           | 1  |  1  | X'00' |  1   | Variable |    2     |
//!           +----+-----+-------+------+----------+----------+
//! ```
//!
//! After a greeting the parser suspends, so the bytes of the auth
//! sub-negotiation are left untouched for the selected handler.

use super::consts::*;
use super::types::TargetAddr;
use crate::error::Socks5Error;
use bytes::{Buf, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Parser position within the greeting/request sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for the greeting version byte
    AwaitVersion,
    /// Waiting for NMETHODS
    AwaitMethodCount,
    /// Waiting for `count` method bytes
    AwaitMethods {
        /// Number of method ids announced by the client
        count: usize,
    },
    /// Greeting delivered; input belongs to the auth handshake
    Suspended,
    /// Waiting for VER CMD RSV ATYP
    AwaitRequestHeader,
    /// Waiting for DST.ADDR
    AwaitAddress {
        /// Raw command byte
        command: u8,
        /// Raw address type byte
        atyp: u8,
    },
    /// Waiting for DST.PORT
    AwaitPort {
        /// Raw command byte
        command: u8,
        /// Destination host without its port
        host: Host,
    },
    /// Request delivered, or a protocol error was raised
    Done,
}

impl ParserState {
    fn name(&self) -> &'static str {
        match self {
            ParserState::AwaitVersion => "await-version",
            ParserState::AwaitMethodCount => "await-method-count",
            ParserState::AwaitMethods { .. } => "await-methods",
            ParserState::Suspended => "suspended",
            ParserState::AwaitRequestHeader => "await-request-header",
            ParserState::AwaitAddress { .. } => "await-address",
            ParserState::AwaitPort { .. } => "await-port",
            ParserState::Done => "done",
        }
    }
}

/// Destination host as read from the wire, before the port arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    /// IPv4 address
    V4(Ipv4Addr),
    /// IPv6 address
    V6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Host {
    fn with_port(self, port: u16) -> TargetAddr {
        match self {
            Host::V4(ip) => TargetAddr::ipv4(ip, port),
            Host::V6(ip) => TargetAddr::ipv6(ip, port),
            Host::Domain(name) => TargetAddr::domain(name, port),
        }
    }
}

/// A request frame as it appeared on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    /// Raw command byte; validated by the connection handler
    pub command: u8,
    /// Destination address and port
    pub destination: TargetAddr,
}

/// Events emitted by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// Greeting received with the offered method ids, in client order
    Methods(Vec<u8>),
    /// Request frame received
    Request(RawRequest),
}

/// SOCKS5 server-side frame parser
#[derive(Debug)]
pub struct Parser {
    state: ParserState,
    buf: BytesMut,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a parser waiting for a greeting
    pub fn new() -> Self {
        Parser {
            state: ParserState::AwaitVersion,
            buf: BytesMut::with_capacity(PARSE_CHUNK_SIZE),
        }
    }

    /// Current state
    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// True when the parser will not produce events until restarted
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParserState::Suspended | ParserState::Done)
    }

    /// Append bytes read from the client
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Restart at the greeting
    pub fn start_methods(&mut self) {
        self.state = ParserState::AwaitVersion;
    }

    /// Resume at the request header, typically after authentication
    pub fn start_requests(&mut self) {
        self.state = ParserState::AwaitRequestHeader;
    }

    /// Hand back buffered bytes that no state has consumed
    pub fn take_unparsed(&mut self) -> BytesMut {
        self.buf.split()
    }

    /// Advance through the buffered bytes
    ///
    /// Returns `Ok(None)` when more input is needed or the parser is idle.
    /// Any error leaves the parser in [`ParserState::Done`].
    pub fn next_event(&mut self) -> Result<Option<ParseEvent>, Socks5Error> {
        match self.advance() {
            Ok(event) => Ok(event),
            Err(e) => {
                self.state = ParserState::Done;
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<ParseEvent>, Socks5Error> {
        loop {
            match self.state.clone() {
                ParserState::AwaitVersion => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let version = self.buf.get_u8();
                    if version != SOCKS5_VERSION {
                        return Err(Socks5Error::UnsupportedVersion(version));
                    }
                    self.state = ParserState::AwaitMethodCount;
                }
                ParserState::AwaitMethodCount => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let count = self.buf.get_u8() as usize;
                    self.state = ParserState::AwaitMethods { count };
                }
                ParserState::AwaitMethods { count } => {
                    if self.buf.len() < count {
                        return Ok(None);
                    }
                    let methods = self.buf.split_to(count).to_vec();
                    self.state = ParserState::Suspended;
                    return Ok(Some(ParseEvent::Methods(methods)));
                }
                ParserState::AwaitRequestHeader => {
                    if self.buf.len() < 4 {
                        return Ok(None);
                    }
                    let version = self.buf.get_u8();
                    if version != SOCKS5_VERSION {
                        return Err(Socks5Error::UnsupportedVersion(version));
                    }
                    let command = self.buf.get_u8();
                    // RSV is not checked; any value is accepted
                    let _reserved = self.buf.get_u8();
                    let atyp = self.buf.get_u8();
                    match atyp {
                        SOCKS5_ADDR_TYPE_IPV4 | SOCKS5_ADDR_TYPE_IPV6 | SOCKS5_ADDR_TYPE_DOMAIN => {}
                        other => return Err(Socks5Error::AddressTypeNotSupported(other)),
                    }
                    self.state = ParserState::AwaitAddress { command, atyp };
                }
                ParserState::AwaitAddress { command, atyp } => {
                    let host = match self.read_host(atyp)? {
                        Some(host) => host,
                        None => return Ok(None),
                    };
                    self.state = ParserState::AwaitPort { command, host };
                }
                ParserState::AwaitPort { command, host } => {
                    if self.buf.len() < 2 {
                        return Ok(None);
                    }
                    let port = self.buf.get_u16();
                    self.state = ParserState::Done;
                    return Ok(Some(ParseEvent::Request(RawRequest {
                        command,
                        destination: host.with_port(port),
                    })));
                }
                ParserState::Suspended | ParserState::Done => return Ok(None),
            }
        }
    }

    fn read_host(&mut self, atyp: u8) -> Result<Option<Host>, Socks5Error> {
        match atyp {
            SOCKS5_ADDR_TYPE_IPV4 => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                let mut octets = [0u8; 4];
                self.buf.copy_to_slice(&mut octets);
                Ok(Some(Host::V4(Ipv4Addr::from(octets))))
            }
            SOCKS5_ADDR_TYPE_IPV6 => {
                if self.buf.len() < 16 {
                    return Ok(None);
                }
                let mut octets = [0u8; 16];
                self.buf.copy_to_slice(&mut octets);
                Ok(Some(Host::V6(Ipv6Addr::from(octets))))
            }
            SOCKS5_ADDR_TYPE_DOMAIN => {
                let len = match self.buf.first() {
                    Some(&len) => len as usize,
                    None => return Ok(None),
                };
                if len == 0 {
                    return Err(Socks5Error::InvalidDomain("empty domain name".to_string()));
                }
                if self.buf.len() < 1 + len {
                    return Ok(None);
                }
                self.buf.advance(1);
                let raw = self.buf.split_to(len);
                let domain = String::from_utf8(raw.to_vec()).map_err(|_| {
                    Socks5Error::InvalidDomain("domain name is not valid UTF-8".to_string())
                })?;
                Ok(Some(Host::Domain(domain)))
            }
            other => Err(Socks5Error::AddressTypeNotSupported(other)),
        }
    }

    pub(crate) fn idle_error(&self) -> Socks5Error {
        Socks5Error::ParserIdle(self.state.name())
    }
}
