//! Guarded remote session
//!
//! A [`RemoteSession`] owns exactly one authenticated connection. Every call
//! is bounded by a timeout and by the operator's cancel token, failures are
//! both returned and recorded, and [`SessionManager::with_session`] closes the
//! connection on every exit path.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::sanitize::{quote, redact};
use super::shell::{CommandResult, Credential, RemoteShell, ShellHandle};
use crate::cancel::CancelToken;
use crate::error::{CtfKitError, Result};
use crate::scope::AuthorizedTarget;
use crate::sink::{note, record_failure, ResultSink, Severity};

/// Sink category for session lifecycle and command events
pub const SESSION_CATEGORY: &str = "session";

/// Boxed future borrowing a session, returned by scoped-session closures
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Closed,
}

/// Direction of a file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote file → local file
    Download,
    /// Local file → remote file
    Upload,
}

/// Connection parameters shared by every session
#[derive(Clone)]
pub struct SessionOptions {
    pub port: u16,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Password piped to `sudo -S`; `None` means passwordless `sudo -n`
    pub sudo_password: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            port: 22,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
            sudo_password: None,
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("port", &self.port)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("sudo_password", &self.sudo_password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// How a bounded call ended
enum Bounded<T> {
    Finished(T),
    TimedOut,
    Cancelled,
}

/// Race `work` against a deadline and the cancel token
async fn bounded<T>(
    cancel: &CancelToken,
    limit: Duration,
    work: impl Future<Output = T>,
) -> Bounded<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Bounded::Cancelled,
        res = tokio::time::timeout(limit, work) => match res {
            Ok(value) => Bounded::Finished(value),
            Err(_) => Bounded::TimedOut,
        },
    }
}

async fn fail(sink: &dyn ResultSink, err: CtfKitError) -> CtfKitError {
    record_failure(sink, SESSION_CATEGORY, err).await
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A single authenticated connection to an authorized target
pub struct RemoteSession {
    target: AuthorizedTarget,
    principal: String,
    handle: Option<Box<dyn ShellHandle>>,
    state: SessionState,
    command_timeout: Duration,
    sudo_password: Option<String>,
    cancel: CancelToken,
    sink: Arc<dyn ResultSink>,
    /// Privilege windows currently open; cancellation defers the close while
    /// any is pending so the restore can still reach the target
    open_windows: usize,
}

impl RemoteSession {
    /// Connect and authenticate. No retry: the first failure is returned.
    pub async fn open(
        shell: &dyn RemoteShell,
        target: &AuthorizedTarget,
        credential: &Credential,
        options: &SessionOptions,
        sink: Arc<dyn ResultSink>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let connect = shell.connect(target, options.port, credential, options.connect_timeout);

        // The shell enforces the connect timeout itself; this bound is a backstop
        let limit = options.connect_timeout + Duration::from_secs(1);
        let result = match bounded(&cancel, limit, connect).await {
            Bounded::Finished(result) => result,
            Bounded::TimedOut => Err(CtfKitError::connection(format!(
                "Connection timeout after {}s",
                options.connect_timeout.as_secs()
            ))),
            Bounded::Cancelled => Err(CtfKitError::Cancelled),
        };

        match result {
            Ok(handle) => {
                note(
                    sink.as_ref(),
                    Severity::Info,
                    SESSION_CATEGORY,
                    format!("Connected to {}@{}:{}", credential.principal, target, options.port),
                )
                .await;
                Ok(Self {
                    target: target.clone(),
                    principal: credential.principal.clone(),
                    handle: Some(handle),
                    state: SessionState::Connected,
                    command_timeout: options.command_timeout,
                    sudo_password: options.sudo_password.clone(),
                    cancel,
                    sink,
                    open_windows: 0,
                })
            }
            Err(CtfKitError::Cancelled) => {
                warn!("Opening session to {} cancelled", target);
                Err(fail(sink.as_ref(), CtfKitError::Cancelled).await)
            }
            Err(e) => {
                warn!("Failed to open session to {}: {}", target, e);
                let recorded =
                    CtfKitError::connection(format!("{}@{}: {}", credential.principal, target, e));
                fail(sink.as_ref(), recorded).await;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &AuthorizedTarget {
        &self.target
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn sink(&self) -> &Arc<dyn ResultSink> {
        &self.sink
    }

    pub fn sudo_password(&self) -> Option<&str> {
        self.sudo_password.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record a failure under the session category and hand it back
    pub async fn reject(&mut self, err: CtfKitError) -> CtfKitError {
        fail(self.sink.as_ref(), err).await
    }

    pub(crate) fn enter_window(&mut self) {
        self.open_windows += 1;
    }

    /// Leave a privilege window; a cancellation seen meanwhile closes now
    pub(crate) async fn leave_window(&mut self) {
        self.open_windows = self.open_windows.saturating_sub(1);
        if self.open_windows == 0 && self.cancel.is_cancelled() {
            self.close().await;
        }
    }

    /// Run one command to completion.
    ///
    /// A non-zero exit status is data, not an error. Timeouts abort the
    /// command and fail; cancellation closes the session and fails.
    pub async fn exec(&mut self, command: &str) -> Result<CommandResult> {
        let cancel = self.cancel.clone();
        self.exec_with(command, &cancel).await
    }

    /// Run a command that must reach the target even after cancellation.
    ///
    /// Only the command timeout bounds it. Used to restore privilege windows.
    pub(crate) async fn exec_uncancellable(&mut self, command: &str) -> Result<CommandResult> {
        self.exec_with(command, &CancelToken::new()).await
    }

    async fn exec_with(&mut self, command: &str, cancel: &CancelToken) -> Result<CommandResult> {
        let handle = match self.handle.as_mut() {
            Some(handle) if self.state == SessionState::Connected => handle,
            _ => {
                let err = CtfKitError::connection("Session is not connected");
                return Err(fail(self.sink.as_ref(), err).await);
            }
        };

        debug!(
            "exec on {}: {}",
            self.target,
            redact(command, self.sudo_password.as_deref())
        );

        match bounded(cancel, self.command_timeout, handle.run(command)).await {
            Bounded::Finished(Ok(result)) => {
                if !result.success() {
                    debug!("Command exited with status {}", result.exit_status);
                }
                Ok(result)
            }
            Bounded::Finished(Err(e)) => Err(fail(self.sink.as_ref(), e).await),
            Bounded::TimedOut => {
                warn!(
                    "Command timed out after {}ms, attempting abort",
                    self.command_timeout.as_millis()
                );
                handle.abort(command).await;
                let err = CtfKitError::Timeout(millis(self.command_timeout));
                Err(fail(self.sink.as_ref(), err).await)
            }
            Bounded::Cancelled => Err(self.cancelled(command).await),
        }
    }

    /// Copy one file between the local and the remote host.
    ///
    /// Downloads overwrite an existing local file.
    pub async fn transfer(
        &mut self,
        remote_path: &str,
        local_path: &Path,
        direction: Direction,
    ) -> Result<()> {
        let handle = match self.handle.as_mut() {
            Some(handle) if self.state == SessionState::Connected => handle,
            _ => {
                let err = CtfKitError::connection("Session is not connected");
                return Err(fail(self.sink.as_ref(), err).await);
            }
        };

        let outcome = match direction {
            Direction::Download => {
                match bounded(&self.cancel, self.command_timeout, handle.get_file(remote_path)).await
                {
                    Bounded::Finished(Ok(bytes)) => {
                        tokio::fs::write(local_path, &bytes).await.map_err(|e| {
                            CtfKitError::transfer(format!(
                                "cannot write {}: {}",
                                local_path.display(),
                                e
                            ))
                        })
                    }
                    Bounded::Finished(Err(e)) => Err(e),
                    Bounded::TimedOut => {
                        handle.abort(&download_command(remote_path)).await;
                        Err(CtfKitError::Timeout(millis(self.command_timeout)))
                    }
                    Bounded::Cancelled => {
                        return Err(self.cancelled(&download_command(remote_path)).await)
                    }
                }
            }
            Direction::Upload => {
                let contents = match tokio::fs::read(local_path).await {
                    Ok(contents) => contents,
                    Err(e) => {
                        let err = CtfKitError::transfer(format!(
                            "cannot read {}: {}",
                            local_path.display(),
                            e
                        ));
                        return Err(fail(self.sink.as_ref(), err).await);
                    }
                };
                match bounded(
                    &self.cancel,
                    self.command_timeout,
                    handle.put_file(remote_path, &contents),
                )
                .await
                {
                    Bounded::Finished(result) => result,
                    Bounded::TimedOut => {
                        handle.abort(&upload_command(remote_path)).await;
                        Err(CtfKitError::Timeout(millis(self.command_timeout)))
                    }
                    Bounded::Cancelled => {
                        return Err(self.cancelled(&upload_command(remote_path)).await)
                    }
                }
            }
        };

        match outcome {
            Ok(()) => {
                let line = match direction {
                    Direction::Download => {
                        format!("Downloaded {} to {}", remote_path, local_path.display())
                    }
                    Direction::Upload => {
                        format!("Uploaded {} to {}", local_path.display(), remote_path)
                    }
                };
                info!("{}", line);
                note(self.sink.as_ref(), Severity::Info, SESSION_CATEGORY, line).await;
                Ok(())
            }
            Err(e) => Err(fail(self.sink.as_ref(), e).await),
        }
    }

    /// React to a cancellation and produce the matching error.
    ///
    /// Inside a privilege window the command is aborted and the session kept
    /// for the restore; otherwise the session is closed.
    async fn cancelled(&mut self, command: &str) -> CtfKitError {
        if self.open_windows > 0 {
            warn!(
                "Operation on {} cancelled inside a privilege window, aborting command",
                self.target
            );
            if let Some(handle) = self.handle.as_mut() {
                handle.abort(command).await;
            }
        } else {
            warn!("Operation on {} cancelled, closing session", self.target);
            self.close().await;
        }
        fail(self.sink.as_ref(), CtfKitError::Cancelled).await
    }

    /// Release the connection. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
            self.state = SessionState::Closed;
            note(
                self.sink.as_ref(),
                Severity::Info,
                SESSION_CATEGORY,
                format!("Closed session to {}", self.target),
            )
            .await;
        }
    }
}

/// Command line the shell runs for a download, as matched by abort
pub fn download_command(remote_path: &str) -> String {
    format!("cat -- {}", quote(remote_path))
}

/// Command line the shell runs for an upload, as matched by abort
pub fn upload_command(remote_path: &str) -> String {
    format!("cat > {}", quote(remote_path))
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Dropping the handle tears the transport down without a clean disconnect
            warn!("Session to {} dropped without close()", self.target);
        }
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("target", &self.target.address())
            .field("principal", &self.principal)
            .field("state", &self.state)
            .finish()
    }
}

/// Opens sessions with shared options and guarantees they are released
#[derive(Clone)]
pub struct SessionManager {
    shell: Arc<dyn RemoteShell>,
    options: SessionOptions,
    sink: Arc<dyn ResultSink>,
}

impl SessionManager {
    pub fn new(shell: Arc<dyn RemoteShell>, options: SessionOptions, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            shell,
            options,
            sink,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Open a session the caller must close
    pub async fn open(
        &self,
        target: &AuthorizedTarget,
        credential: &Credential,
        cancel: CancelToken,
    ) -> Result<RemoteSession> {
        RemoteSession::open(
            self.shell.as_ref(),
            target,
            credential,
            &self.options,
            self.sink.clone(),
            cancel,
        )
        .await
    }

    /// Open a session, run `body` with it, and close it whatever `body` returns.
    ///
    /// ```ignore
    /// let uptime = manager
    ///     .with_session(&target, &credential, cancel, |session| {
    ///         Box::pin(async move { session.exec("uptime").await })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_session<T, F>(
        &self,
        target: &AuthorizedTarget,
        credential: &Credential,
        cancel: CancelToken,
        body: F,
    ) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut RemoteSession) -> SessionFuture<'a, T>,
    {
        let mut session = self.open(target, credential, cancel).await?;
        let result = body(&mut session).await;
        session.close().await;
        result
    }
}
