//! Error types for Socksd
//!
//! This module defines all custom error types used throughout the server,
//! plus the translation of lookup and connect failures into SOCKS5 reply codes.

use std::io;
use thiserror::Error;

/// SOCKS5 specific errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Peer closed the stream in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// No acceptable authentication method
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Authentication failed
    #[error("Authentication failed")]
    AuthFailed,

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Byte outside the reply code table
    #[error("Invalid reply code: {0}")]
    InvalidReplyCode(u8),

    /// The registry already holds the maximum number of handlers
    #[error("Too many authentication handlers (limited to 255)")]
    TooManyAuthHandlers,

    /// A handler with the same method id is already registered
    #[error("Authentication method already registered: {0}")]
    DuplicateAuthMethod(u8),

    /// Parser was asked for an event while not expecting one
    #[error("Parser is not accepting input in state {0}")]
    ParserIdle(&'static str),

    /// IO error on the client stream
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Name resolution failures reported by a [`Resolver`](crate::socks::Resolver)
#[derive(Error, Debug)]
pub enum LookupError {
    /// The name does not resolve to any address
    #[error("Host not found: {0}")]
    NotFound(String),

    /// The lookup did not complete in time
    #[error("Lookup timed out: {0}")]
    TimedOut(String),

    /// Any other resolver failure
    #[error("Lookup failed: {0}")]
    Io(#[from] io::Error),
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ReplyCode {
    type Error = Socks5Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ReplyCode::Succeeded),
            0x01 => Ok(ReplyCode::GeneralFailure),
            0x02 => Ok(ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(ReplyCode::NetworkUnreachable),
            0x04 => Ok(ReplyCode::HostUnreachable),
            0x05 => Ok(ReplyCode::ConnectionRefused),
            0x06 => Ok(ReplyCode::TtlExpired),
            0x07 => Ok(ReplyCode::CommandNotSupported),
            0x08 => Ok(ReplyCode::AddressTypeNotSupported),
            _ => Err(Socks5Error::InvalidReplyCode(value)),
        }
    }
}

impl From<&io::Error> for ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

impl From<&LookupError> for ReplyCode {
    fn from(err: &LookupError) -> Self {
        match err {
            LookupError::NotFound(_) | LookupError::TimedOut(_) => ReplyCode::HostUnreachable,
            LookupError::Io(e) => ReplyCode::from(e),
        }
    }
}
