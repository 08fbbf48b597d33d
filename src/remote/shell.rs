//! Remote shell capability
//!
//! The session layer depends only on these traits. [`SshShell`](super::ssh::SshShell)
//! is the production implementation; tests plug in a recording double.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::scope::AuthorizedTarget;

/// Output from one command run to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit status of the command, `-1` if the remote side never reported one
    pub exit_status: i32,

    /// Standard output from the command
    pub stdout: Vec<u8>,

    /// Standard error from the command
    pub stderr: Vec<u8>,
}

impl CommandResult {
    pub fn new(exit_status: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Exit status 0
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout_text();
        let stderr = self.stderr_text();
        if stderr.is_empty() {
            stdout
        } else if stdout.is_empty() {
            stderr
        } else {
            format!("{}\n{}", stdout, stderr)
        }
    }
}

/// Secret half of a credential
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    Password(String),
    /// OpenSSH private key content (not a path)
    PrivateKey(String),
}

/// Login identity for one session. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub principal: String,
    pub secret: Secret,
}

impl Credential {
    pub fn password(principal: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: Secret::Password(password.into()),
        }
    }

    pub fn private_key(principal: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: Secret::PrivateKey(key.into()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.secret {
            Secret::Password(_) => "password",
            Secret::PrivateKey(_) => "private_key",
        };
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("secret", &format_args!("<{} redacted>", kind))
            .finish()
    }
}

/// Opens authenticated connections
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Connect and authenticate, failing within `timeout`
    async fn connect(
        &self,
        target: &AuthorizedTarget,
        port: u16,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn ShellHandle>>;
}

/// One live, authenticated connection
#[async_trait]
pub trait ShellHandle: Send {
    /// Run a command to completion and capture its output
    async fn run(&mut self, command: &str) -> Result<CommandResult>;

    /// Read a whole remote file
    async fn get_file(&mut self, remote_path: &str) -> Result<Vec<u8>>;

    /// Create or replace a remote file
    async fn put_file(&mut self, remote_path: &str, contents: &[u8]) -> Result<()>;

    /// Best-effort kill of a command whose `run` was abandoned
    async fn abort(&mut self, _command: &str) {}

    /// Release the connection
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_success() {
        let output = CommandResult::new(0, "hello", "");
        assert!(output.success());
        assert_eq!(output.stdout_text(), "hello");
    }

    #[test]
    fn test_command_result_failure() {
        let output = CommandResult::new(1, "", "error");
        assert!(!output.success());
    }

    #[test]
    fn test_missing_exit_status_is_not_success() {
        let output = CommandResult::new(-1, "partial", "");
        assert!(!output.success());
    }

    #[test]
    fn test_command_result_combined() {
        assert_eq!(
            CommandResult::new(0, "stdout", "stderr").combined_output(),
            "stdout\nstderr"
        );
        assert_eq!(CommandResult::new(0, "stdout", "").combined_output(), "stdout");
        assert_eq!(CommandResult::new(1, "", "stderr").combined_output(), "stderr");
    }

    #[test]
    fn test_lossy_text_from_invalid_utf8() {
        let output = CommandResult::new(0, vec![b'o', 0xff, b'k'], Vec::new());
        assert_eq!(output.stdout_text(), "o\u{FFFD}k");
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = Credential::password("kali", "hunter2");
        let text = format!("{:?}", cred);
        assert!(text.contains("kali"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("redacted"));
    }
}
