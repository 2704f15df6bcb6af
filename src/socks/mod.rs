//! SOCKS5 module for Socksd
//!
//! This module implements the server side of the SOCKS5 protocol: the
//! greeting/request parser, pluggable authentication, the per-connection
//! handler and the CONNECT and BIND executors.

pub mod auth;
mod bind;
mod connect;
mod connection;
pub mod consts;
mod handler;
mod parser;
mod relay;
mod reply;
mod resolve;
mod types;

pub use auth::{
    authenticate, AuthContext, AuthHandler, AuthOutcome, AuthRegistry, AuthStream,
    BindConflictHook, CredentialValidator, NoAuth, StaticUsers, UserPassword,
};
pub use bind::{handle_bind, BindOptions, BindSession, BindWait};
pub use connect::{handle_connect, ConnectOptions};
pub use connection::Connection;
pub use handler::{ConnectionHandler, ConnectionObserver, Decision, Outcome, Verdict};
pub use parser::{Host, ParseEvent, Parser, ParserState, RawRequest};
pub use relay::{relay, RelayStats};
pub use reply::{encode_method_selection, encode_reply, write_reply, UNSPECIFIED_BIND_ADDR};
pub use resolve::{resolve_target, Resolver, SystemResolver};
pub use types::{AddrType, Request, SocksCommand, TargetAddr};
