//! Server configuration types
//!
//! Defines the main configuration structure for the SOCKS5 server.

use super::transport::TlsConfig;
use crate::helper::{
    DEFAULT_BIND_WAIT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_BIND_PORT,
    DEFAULT_MIN_BIND_PORT,
};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener and executor settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication methods and credentials
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Check the values serde cannot check
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.auth.validate()
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1080)
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to accept SOCKS5 clients on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Maximum number of concurrent client connections (unlimited if unset)
    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Enable TCP_NODELAY on client, destination and peer sockets
    #[serde(default)]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds for client sockets
    #[serde(default)]
    pub keepalive_secs: Option<u64>,

    /// TCP keepalive interval in seconds for client sockets
    #[serde(default)]
    pub keepalive_interval: Option<u64>,

    /// Outbound CONNECT timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// BIND listener settings
    #[serde(default)]
    pub bind: BindConfig,

    /// TLS settings; the listener speaks TLS when present
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: default_listen(),
            max_connections: None,
            nodelay: false,
            keepalive_secs: None,
            keepalive_interval: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            bind: BindConfig::default(),
            tls: None,
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        if self.max_connections == Some(0) {
            bail!("server.max_connections must be greater than 0");
        }
        if self.connect_timeout_ms == 0 {
            bail!("server.connect_timeout_ms must be greater than 0");
        }
        self.bind.validate()
    }
}

fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_min_port() -> u16 {
    DEFAULT_MIN_BIND_PORT
}

fn default_max_port() -> u16 {
    DEFAULT_MAX_BIND_PORT
}

fn default_max_wait_ms() -> u64 {
    DEFAULT_BIND_WAIT_MS
}

/// BIND configuration
///
/// The wait and the port range are independent settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BindConfig {
    /// Address BIND listeners are opened on
    #[serde(default = "default_bind_host")]
    pub host: IpAddr,

    /// Lower bound of the random port range
    #[serde(default = "default_min_port")]
    pub min_port: u16,

    /// Upper bound of the random port range
    #[serde(default = "default_max_port")]
    pub max_port: u16,

    /// How long a BIND listener waits for its peer, in milliseconds
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for BindConfig {
    fn default() -> Self {
        BindConfig {
            host: default_bind_host(),
            min_port: default_min_port(),
            max_port: default_max_port(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl BindConfig {
    fn validate(&self) -> Result<()> {
        if self.min_port == 0 {
            bail!("server.bind.min_port must be greater than 0");
        }
        if self.min_port > self.max_port {
            bail!(
                "server.bind.min_port ({}) is greater than server.bind.max_port ({})",
                self.min_port,
                self.max_port
            );
        }
        if self.max_wait_ms == 0 {
            bail!("server.bind.max_wait_ms must be greater than 0");
        }
        Ok(())
    }
}

/// Authentication method names accepted in `auth.methods`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethodName {
    /// No authentication (method 0x00)
    #[serde(rename = "none")]
    None,
    /// Username/password (method 0x02)
    #[serde(rename = "password")]
    Password,
}

fn default_methods() -> Vec<AuthMethodName> {
    vec![AuthMethodName::None]
}

/// Authentication configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    /// Enabled methods; their order is the server's preference order
    #[serde(default = "default_methods")]
    pub methods: Vec<AuthMethodName>,

    /// Credentials for the password method
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            methods: default_methods(),
            users: Vec::new(),
        }
    }
}

impl AuthConfig {
    fn validate(&self) -> Result<()> {
        for (i, method) in self.methods.iter().enumerate() {
            if self.methods[..i].contains(method) {
                bail!("auth.methods lists {:?} more than once", method);
            }
        }
        if self.methods.contains(&AuthMethodName::Password) && self.users.is_empty() {
            bail!("auth.methods enables password but auth.users is empty");
        }
        for user in &self.users {
            if user.username.is_empty() || user.username.len() > 255 {
                bail!("auth.users: username must be 1 to 255 bytes");
            }
            if user.password.is_empty() || user.password.len() > 255 {
                bail!("auth.users: password of {} must be 1 to 255 bytes", user.username);
            }
        }
        Ok(())
    }
}

/// A user of the password method
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserConfig {
    /// Username
    pub username: String,

    /// Password
    pub password: String,

    /// Fixed port for every BIND of this user
    #[serde(default)]
    pub bind_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, "127.0.0.1:1080".parse().unwrap());
        assert_eq!(config.max_connections, None);
        assert!(!config.nodelay);
        assert_eq!(config.connect_timeout_ms, 10000);
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_bind_config_default() {
        let config = BindConfig::default();
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.min_port, 10000);
        assert_eq!(config.max_port, 20000);
        assert_eq!(config.max_wait_ms, 60000);
    }

    #[test]
    fn test_auth_config_default() {
        let config = AuthConfig::default();
        assert_eq!(config.methods, vec![AuthMethodName::None]);
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_validate_port_range() {
        let mut config = Config::default();
        config.server.bind.min_port = 30000;
        config.server.bind.max_port = 20000;
        assert!(config.validate().is_err());

        config.server.bind.min_port = 0;
        config.server.bind.max_port = 20000;
        assert!(config.validate().is_err());

        config.server.bind.min_port = 20000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_values() {
        let mut config = Config::default();
        config.server.bind.max_wait_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.max_connections = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.connect_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_auth() {
        let mut config = Config::default();
        config.auth.methods = vec![AuthMethodName::None, AuthMethodName::None];
        assert!(config.validate().is_err());

        config.auth.methods = vec![AuthMethodName::Password];
        assert!(config.validate().is_err());

        config.auth.users.push(UserConfig {
            username: "alice".to_string(),
            password: "secret".to_string(),
            bind_port: None,
        });
        assert!(config.validate().is_ok());

        config.auth.users[0].password.clear();
        assert!(config.validate().is_err());
    }
}
