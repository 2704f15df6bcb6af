//! No authentication handler
//!
//! Handles the case when no authentication is required.

use super::{AuthContext, AuthHandler, AuthOutcome, AuthStream};
use crate::socks::consts::SOCKS5_AUTH_METHOD_NONE;
use anyhow::Result;
use async_trait::async_trait;

/// No authentication handler (method `0x00`)
///
/// Accepts every client without any sub-negotiation and produces an
/// empty [`AuthContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthHandler for NoAuth {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_NONE
    }

    async fn negotiate(&self, _stream: &mut dyn AuthStream) -> Result<AuthOutcome> {
        // No authentication required - nothing to do
        Ok(AuthOutcome::Accepted(AuthContext::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_auth() {
        let (_client, mut server) = tokio::io::duplex(16);
        let outcome = NoAuth.negotiate(&mut server).await.unwrap();

        match outcome {
            AuthOutcome::Accepted(context) => assert!(context.user().is_none()),
            AuthOutcome::Rejected => panic!("NoAuth must accept"),
        }
        assert_eq!(NoAuth.method(), 0x00);
    }
}
