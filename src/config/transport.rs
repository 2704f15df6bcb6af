//! Transport configuration types
//!
//! Defines the TLS settings of the client-facing listener.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// TLS listener configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate chain, leaf first
    pub cert: PathBuf,

    /// PEM private key (PKCS#8, PKCS#1 or SEC1)
    pub key: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_config_deserialize() {
        let config: TlsConfig = toml::from_str(
            r#"
cert = "server.crt"
key = "server.key"
"#,
        )
        .unwrap();
        assert_eq!(config.cert, PathBuf::from("server.crt"));
        assert_eq!(config.key, PathBuf::from("server.key"));
    }

    #[test]
    fn test_tls_config_requires_key() {
        let result: Result<TlsConfig, _> = toml::from_str(r#"cert = "server.crt""#);
        assert!(result.is_err());
    }
}
