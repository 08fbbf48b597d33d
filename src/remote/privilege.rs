//! Temporary privilege windows
//!
//! Runs `elevate → action → restore` on one session. Restore is attempted
//! exactly once per window, whatever happened before it, and its failure is
//! reported on its own as a critical record.

use tracing::{error, info, warn};

use super::sanitize::{quote, wrap_sudo_command};
use super::session::{RemoteSession, SessionFuture};
use crate::error::{CtfKitError, Result};
use crate::sink::{note, note_error, Severity};

/// Sink category for privilege windows
pub const PRIVILEGE_CATEGORY: &str = "privilege";

/// Mode assumed when the original mode of a resource cannot be read
pub const FALLBACK_PROTECTED_MODE: &str = "000";

/// Commands that open and close one privilege window on a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeWindow {
    pub resource: String,
    pub original_mode: String,
    pub elevated_mode: String,
    elevate: String,
    restore: String,
    /// Command printing the current mode, used to confirm the restore
    mode_check: Option<String>,
}

impl PrivilegeWindow {
    /// Window with caller-supplied elevate/restore commands
    pub fn new(
        resource: impl Into<String>,
        original_mode: impl Into<String>,
        elevated_mode: impl Into<String>,
        elevate: impl Into<String>,
        restore: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            original_mode: original_mode.into(),
            elevated_mode: elevated_mode.into(),
            elevate: elevate.into(),
            restore: restore.into(),
            mode_check: None,
        }
    }

    /// `sudo chmod <elevated>` then `sudo chmod <original>` on `resource`
    pub fn chmod(
        resource: &str,
        original_mode: &str,
        elevated_mode: &str,
        sudo_password: Option<&str>,
    ) -> Self {
        let chmod = |mode: &str| {
            wrap_sudo_command(&format!("chmod {} {}", mode, quote(resource)), sudo_password)
        };
        Self {
            resource: resource.to_string(),
            original_mode: original_mode.to_string(),
            elevated_mode: elevated_mode.to_string(),
            elevate: chmod(elevated_mode),
            restore: chmod(original_mode),
            mode_check: Some(mode_check_command(resource)),
        }
    }

    pub fn elevate_command(&self) -> &str {
        &self.elevate
    }

    pub fn restore_command(&self) -> &str {
        &self.restore
    }
}

/// `stat` invocation printing the octal mode of `resource`
pub fn mode_check_command(resource: &str) -> String {
    format!("stat -c %a -- {}", quote(resource))
}

/// Read the octal access mode of a remote resource.
///
/// Returns `None` when it cannot be determined; the caller picks a fallback.
pub async fn current_mode(session: &mut RemoteSession, resource: &str) -> Result<Option<String>> {
    let output = session.exec(&mode_check_command(resource)).await?;
    if !output.success() {
        return Ok(None);
    }
    let mode = output.stdout_text().trim().to_string();
    if !mode.is_empty() && mode.chars().all(|c| c.is_ascii_digit()) {
        Ok(Some(mode))
    } else {
        Ok(None)
    }
}

/// Result of a privileged action
#[derive(Debug)]
pub struct ActionResult<T> {
    /// What the action returned (or why it never ran)
    pub action: Result<T>,
    /// Whether the resource is back in its original mode
    pub restore_succeeded: bool,
    /// Set when `restore_succeeded` is false
    pub restore_error: Option<CtfKitError>,
}

impl<T> ActionResult<T> {
    pub fn action_succeeded(&self) -> bool {
        self.action.is_ok()
    }

    /// Collapse into one result. A failed restore wins over the action's
    /// outcome because it leaves the target in an insecure state.
    pub fn into_result(self) -> Result<T> {
        match self.restore_error {
            Some(err) => Err(err),
            None => self.action,
        }
    }
}

/// Run `action` inside `window` on `session`.
///
/// `action` runs only if elevation succeeded; restore runs in every case,
/// including after an elevation that failed halfway. A cancellation during
/// the window aborts the running command, and the session is closed only
/// once the restore has been sent.
pub async fn run_elevated<T, F>(
    session: &mut RemoteSession,
    window: &PrivilegeWindow,
    action: F,
) -> ActionResult<T>
where
    F: for<'a> FnOnce(&'a mut RemoteSession) -> SessionFuture<'a, T>,
{
    let sink = session.sink().clone();
    info!(
        "Opening privilege window on {} ({} -> {})",
        window.resource, window.original_mode, window.elevated_mode
    );

    session.enter_window();

    let elevated = match session.exec(&window.elevate).await {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => Err(CtfKitError::elevation_failed(format!(
            "elevating {} exited with {}: {}",
            window.resource,
            output.exit_status,
            output.stderr_text().trim()
        ))),
        Err(CtfKitError::Cancelled) => Err(CtfKitError::Cancelled),
        Err(e) => Err(CtfKitError::elevation_failed(format!(
            "elevating {}: {}",
            window.resource, e
        ))),
    };

    let action_result = match elevated {
        Ok(()) => action(session).await,
        Err(CtfKitError::Cancelled) => Err(CtfKitError::Cancelled),
        Err(e) => {
            warn!("{}", e);
            note_error(sink.as_ref(), PRIVILEGE_CATEGORY, &e).await;
            Err(e)
        }
    };

    if let Err(e) = &action_result {
        if !matches!(e, CtfKitError::ElevationFailed(_) | CtfKitError::Cancelled) {
            note_error(sink.as_ref(), PRIVILEGE_CATEGORY, e).await;
        }
    }

    let restore_error = restore(session, window).await.err();

    match &restore_error {
        None => {
            note(
                sink.as_ref(),
                Severity::Info,
                PRIVILEGE_CATEGORY,
                format!("Restored mode {} on {}", window.original_mode, window.resource),
            )
            .await;
        }
        Some(err) => {
            error!("{}", err);
            note_error(sink.as_ref(), PRIVILEGE_CATEGORY, err).await;
            note(
                sink.as_ref(),
                Severity::Critical,
                PRIVILEGE_CATEGORY,
                format!(
                    "Remediation: run `chmod {} {}` on {} as root",
                    window.original_mode,
                    window.resource,
                    session.target()
                ),
            )
            .await;
        }
    }

    session.leave_window().await;

    ActionResult {
        action: action_result,
        restore_succeeded: restore_error.is_none(),
        restore_error,
    }
}

/// Compare octal modes, so "0" matches "000" and "0640" matches "640"
fn same_mode(a: &str, b: &str) -> bool {
    match (u32::from_str_radix(a, 8), u32::from_str_radix(b, 8)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Send the restore command once, then confirm the mode if a check command exists
async fn restore(session: &mut RemoteSession, window: &PrivilegeWindow) -> Result<()> {
    let failure = |detail: String| CtfKitError::PrivilegeRestoreFailure {
        resource: window.resource.clone(),
        expected_mode: window.original_mode.clone(),
        detail,
    };

    let output = session
        .exec_uncancellable(&window.restore)
        .await
        .map_err(|e| failure(format!("restore command failed: {}", e)))?;

    if !output.success() {
        return Err(failure(format!(
            "restore command exited with {}: {}",
            output.exit_status,
            output.stderr_text().trim()
        )));
    }

    let Some(check) = &window.mode_check else {
        return Ok(());
    };

    // An unreadable mode check leaves the exit status as the only evidence
    match session.exec_uncancellable(check).await {
        Ok(output) if output.success() => {
            let actual = output.stdout_text().trim().to_string();
            if same_mode(&actual, &window.original_mode) {
                Ok(())
            } else {
                Err(failure(format!("found mode {}", actual)))
            }
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chmod_window_commands() {
        let window = PrivilegeWindow::chmod("/etc/shadow", "640", "644", None);
        assert_eq!(
            window.elevate_command(),
            "sudo -n sh -c 'chmod 644 '\"'\"'/etc/shadow'\"'\"''"
        );
        assert_eq!(
            window.restore_command(),
            "sudo -n sh -c 'chmod 640 '\"'\"'/etc/shadow'\"'\"''"
        );
        assert_eq!(window.mode_check.as_deref(), Some("stat -c %a -- '/etc/shadow'"));
    }

    #[test]
    fn test_chmod_window_with_sudo_password() {
        let window = PrivilegeWindow::chmod("/etc/shadow", "000", "644", Some("pw"));
        assert!(window.elevate_command().starts_with("printf '%s\\n' 'pw' | sudo"));
        assert!(window.restore_command().contains("chmod 000"));
    }

    #[test]
    fn test_same_mode() {
        assert!(same_mode("0", "000"));
        assert!(same_mode("640", "0640"));
        assert!(!same_mode("644", "640"));
        assert!(!same_mode("abc", "640"));
    }

    #[test]
    fn test_action_result_restore_failure_wins() {
        let result: ActionResult<u8> = ActionResult {
            action: Ok(1),
            restore_succeeded: false,
            restore_error: Some(CtfKitError::PrivilegeRestoreFailure {
                resource: "/etc/shadow".into(),
                expected_mode: "000".into(),
                detail: "x".into(),
            }),
        };
        assert!(result.action_succeeded());
        assert!(matches!(
            result.into_result(),
            Err(CtfKitError::PrivilegeRestoreFailure { .. })
        ));
    }
}
