//! # Socksd - SOCKS5 Proxy Server
//!
//! Socksd is a SOCKS5 server that negotiates an authentication method, parses
//! client requests and executes forward (CONNECT) or reverse (BIND) proxy
//! sessions over plain TCP or TLS.
//!
//! ## Features
//!
//! - **Pluggable Authentication**: ordered registry of auth handlers; no-auth
//!   and RFC 1929 username/password are built in
//! - **CONNECT and BIND**: forward proxying and single-peer reverse listeners
//!   with port-conflict retry and a bounded wait
//! - **Policy Hook**: an observer can accept, deny or take over each request
//! - **TLS Listener**: optional rustls transport
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksd::config::load_config;
//! use socksd::Server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("socksd.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     let server = Server::from_config(&config, None).await?;
//!     server.run(shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Transport -> Server -> ConnectionHandler -> Parser / AuthRegistry
//!                                          -> Connect | Bind executor -> relay
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod helper;
pub mod server;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{LookupError, ReplyCode, Socks5Error};
pub use server::Server;

/// Version of the Socksd library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
