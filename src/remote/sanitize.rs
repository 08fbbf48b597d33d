//! Command sanitization and shell quoting
//!
//! Every operator-supplied path, keyword or command that ends up inside a
//! remote command line goes through these helpers.

use crate::error::{CtfKitError, Result};

/// Sanitize a command before execution
///
/// Trims whitespace, rejects empty commands and enforces `max_chars`.
///
/// # Examples
/// ```
/// use ctfkit::remote::sanitize::sanitize_command;
///
/// let cmd = sanitize_command("  ls -la  ", Some(1000)).unwrap();
/// assert_eq!(cmd, "ls -la");
///
/// let result = sanitize_command("a".repeat(100).as_str(), Some(50));
/// assert!(result.is_err());
/// ```
pub fn sanitize_command(command: &str, max_chars: Option<usize>) -> Result<String> {
    let trimmed = command.trim();

    if trimmed.is_empty() {
        return Err(CtfKitError::invalid_params("Command cannot be empty"));
    }

    if let Some(max) = max_chars {
        if trimmed.len() > max {
            return Err(CtfKitError::invalid_params(format!(
                "Command is too long (max {} characters, got {})",
                max,
                trimmed.len()
            )));
        }
    }

    Ok(trimmed.to_string())
}

/// Validate a remote path argument (non-empty, no NUL or newline)
pub fn sanitize_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(CtfKitError::invalid_params("Path cannot be empty"));
    }
    if trimmed.contains(['\0', '\n', '\r']) {
        return Err(CtfKitError::invalid_params(format!(
            "Path contains control characters: {:?}",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

/// Escapes a string for use inside a single-quoted shell word.
///
/// `'` becomes `'"'"'`: close the quote, emit a double-quoted quote, reopen.
///
/// ```
/// use ctfkit::remote::sanitize::escape_for_shell;
///
/// assert_eq!(escape_for_shell("it's"), "it'\"'\"'s");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}

/// Wrap a string as one single-quoted shell word
pub fn quote(s: &str) -> String {
    format!("'{}'", escape_for_shell(s))
}

/// Wraps a command for execution with sudo privileges.
///
/// Without a password `sudo -n` is used so a password prompt fails instead
/// of hanging. With one, the password is piped in through `printf`.
///
/// ```
/// use ctfkit::remote::sanitize::wrap_sudo_command;
///
/// let cmd = wrap_sudo_command("chmod 644 /etc/shadow", None);
/// assert_eq!(cmd, "sudo -n sh -c 'chmod 644 /etc/shadow'");
/// ```
pub fn wrap_sudo_command(command: &str, password: Option<&str>) -> String {
    let escaped_command = escape_for_shell(command);

    match password {
        None => format!("sudo -n sh -c '{}'", escaped_command),
        Some(pwd) => {
            let escaped_pwd = escape_for_shell(pwd);
            format!(
                "printf '%s\\n' '{}' | sudo -p \"\" -S sh -c '{}'",
                escaped_pwd, escaped_command
            )
        }
    }
}

/// Remove every occurrence of `secret` from text bound for logs
pub fn redact(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(s) if !s.is_empty() => text.replace(s, "***"),
        _ => text.to_string(),
    }
}
