//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use tracing::debug;

/// SSH client handler for russh
///
/// Every server host key is accepted. Only scope-checked lab targets get here.
#[derive(Debug, Clone)]
pub struct SshHandler;

impl SshHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SshHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting server host key");
        Ok(true)
    }
}
