//! russh-backed implementation of the remote shell capability
//!
//! Each command runs on its own exec channel. File transfer also goes over
//! exec channels (`cat` in either direction) so no SFTP subsystem is needed
//! on the target.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::handler::SshHandler;
use super::sanitize::{escape_for_shell, quote};
use super::shell::{CommandResult, Credential, RemoteShell, Secret, ShellHandle};
use crate::error::{CtfKitError, Result};
use crate::scope::AuthorizedTarget;

/// Exit status reported when the server closes a channel without one
const NO_EXIT_STATUS: i32 = -1;

/// Connector opening russh client sessions
#[derive(Debug, Clone, Default)]
pub struct SshShell;

impl SshShell {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn connect(
        &self,
        target: &AuthorizedTarget,
        port: u16,
        credential: &Credential,
        connect_timeout: Duration,
    ) -> Result<Box<dyn ShellHandle>> {
        info!("Connecting to SSH server {}:{}...", target, port);

        let ssh_config = Arc::new(client::Config::default());
        let addr = (target.ip(), port);

        let connect_result = timeout(
            connect_timeout,
            client::connect(ssh_config, addr, SshHandler::new()),
        )
        .await;

        let mut session = match connect_result {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(CtfKitError::connection(e.to_string()));
            }
            Err(_) => {
                error!("SSH connection timeout after {}s", connect_timeout.as_secs());
                return Err(CtfKitError::connection(format!(
                    "Connection timeout after {}s",
                    connect_timeout.as_secs()
                )));
            }
        };

        // Authentication shares the connect budget
        match timeout(connect_timeout, authenticate(&mut session, credential)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                disconnect(&session).await;
                return Err(e);
            }
            Err(_) => {
                disconnect(&session).await;
                return Err(CtfKitError::auth("Authentication timed out"));
            }
        }

        info!(
            "Successfully connected to {}@{}:{}",
            credential.principal, target, port
        );

        Ok(Box::new(SshShellHandle {
            session: Some(session),
        }))
    }
}

/// Authenticate with the SSH server
async fn authenticate(session: &mut Handle<SshHandler>, credential: &Credential) -> Result<()> {
    let user = credential.principal.as_str();

    match &credential.secret {
        Secret::Password(password) => {
            debug!("Attempting password authentication for user '{}'", user);
            let auth_result = session
                .authenticate_password(user, password)
                .await
                .map_err(|e| CtfKitError::auth(e.to_string()))?;

            if auth_result.success() {
                info!("Password authentication successful");
                Ok(())
            } else {
                Err(CtfKitError::auth("Password authentication rejected"))
            }
        }
        Secret::PrivateKey(key_content) => {
            debug!("Attempting key authentication for user '{}'", user);

            let key = russh::keys::PrivateKey::from_openssh(key_content.as_bytes())
                .map_err(|e| CtfKitError::SshKey(format!("Failed to parse private key: {}", e)))?;
            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

            let auth_result = session
                .authenticate_publickey(user, key_with_alg)
                .await
                .map_err(|e| CtfKitError::auth(e.to_string()))?;

            if auth_result.success() {
                info!("Key authentication successful");
                Ok(())
            } else {
                Err(CtfKitError::auth("Key authentication rejected"))
            }
        }
    }
}

async fn disconnect(session: &Handle<SshHandler>) {
    if let Err(e) = session
        .disconnect(russh::Disconnect::ByApplication, "", "")
        .await
    {
        debug!("Disconnect failed: {}", e);
    }
}

/// One authenticated russh session
pub struct SshShellHandle {
    session: Option<Handle<SshHandler>>,
}

impl SshShellHandle {
    /// Open a new session channel
    async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| CtfKitError::connection("SSH connection not established"))?;

        session
            .channel_open_session()
            .await
            .map_err(|e| CtfKitError::connection(format!("Failed to open channel: {}", e)))
    }

    /// Start `command` on a fresh exec channel
    async fn exec_channel(&self, command: &str) -> Result<Channel<client::Msg>> {
        let channel = self.open_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| CtfKitError::connection(format!("Failed to exec command: {}", e)))?;
        Ok(channel)
    }
}

/// Collect output from a channel until it closes
async fn collect_channel_output(mut channel: Channel<client::Msg>) -> CommandResult {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            // ext == 1 is stderr
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                } else {
                    stdout.extend_from_slice(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status: code } => {
                exit_status = Some(i32::try_from(code).unwrap_or(i32::MAX));
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                warn!("Remote command terminated by signal {:?}", signal_name);
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    let result = CommandResult {
        exit_status: exit_status.unwrap_or(NO_EXIT_STATUS),
        stdout,
        stderr,
    };

    debug!(
        "Command completed: exit_status={}, stdout_len={}, stderr_len={}",
        result.exit_status,
        result.stdout.len(),
        result.stderr.len()
    );

    result
}

#[async_trait]
impl ShellHandle for SshShellHandle {
    async fn run(&mut self, command: &str) -> Result<CommandResult> {
        let channel = self.exec_channel(command).await?;
        Ok(collect_channel_output(channel).await)
    }

    async fn get_file(&mut self, remote_path: &str) -> Result<Vec<u8>> {
        let command = format!("cat -- {}", quote(remote_path));
        let channel = self.exec_channel(&command).await?;
        let output = collect_channel_output(channel).await;

        if !output.success() {
            return Err(CtfKitError::transfer(format!(
                "cannot read {}: {}",
                remote_path,
                output.stderr_text().trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn put_file(&mut self, remote_path: &str, contents: &[u8]) -> Result<()> {
        let command = format!("cat > {}", quote(remote_path));
        let channel = self.exec_channel(&command).await?;

        channel
            .data(contents)
            .await
            .map_err(|e| CtfKitError::transfer(format!("Failed to send file data: {}", e)))?;
        channel
            .eof()
            .await
            .map_err(|e| CtfKitError::transfer(format!("Failed to finish upload: {}", e)))?;

        let output = collect_channel_output(channel).await;
        if !output.success() {
            return Err(CtfKitError::transfer(format!(
                "cannot write {}: {}",
                remote_path,
                output.stderr_text().trim()
            )));
        }
        Ok(())
    }

    /// Sends `timeout 3s pkill -f '<command>'` on a separate channel
    async fn abort(&mut self, command: &str) {
        let abort_cmd = format!(
            "timeout 3s pkill -f '{}' 2>/dev/null || true",
            escape_for_shell(command)
        );

        let channel = match self.exec_channel(&abort_cmd).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to exec abort command: {}", e);
                return;
            }
        };

        if timeout(Duration::from_secs(5), collect_channel_output(channel))
            .await
            .is_err()
        {
            warn!("Abort command did not finish within 5s");
        }
        debug!("Abort command completed");
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            disconnect(&session).await;
            info!("SSH connection closed");
        }
    }
}

impl std::fmt::Debug for SshShellHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshShellHandle")
            .field("connected", &self.session.is_some())
            .finish()
    }
}
