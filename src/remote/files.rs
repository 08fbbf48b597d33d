//! File exploration on a connected target
//!
//! Directory listings, file reads, keyword search and protected reads. Each
//! function works on an already-open session; the caller owns its lifetime.

use tracing::{debug, info};

use super::privilege::{current_mode, run_elevated, ActionResult, PrivilegeWindow, FALLBACK_PROTECTED_MODE};
use super::sanitize::{quote, sanitize_path};
use super::session::RemoteSession;
use super::shell::CommandResult;
use crate::error::{CtfKitError, Result};

/// Directories listed when the operator does not name any
pub const COMMON_DIRECTORIES: [&str; 4] = ["/home", "/root", "/var/www", "/etc"];

/// Paths that need a privilege window to be read
pub const PROTECTED_FILES: [&str; 1] = ["/etc/shadow"];

/// Mode a protected file is opened up to for reading
pub const READABLE_MODE: &str = "644";

/// Listing of one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub directory: String,
    /// `ls -la` lines, or the error text when the listing failed
    pub entries: Vec<String>,
    pub exit_status: i32,
}

impl DirectoryListing {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Outcome of a keyword search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMatches {
    Found(Vec<String>),
    /// grep exited 1
    NoMatches,
    /// grep exited >1 (unreadable file, bad pattern ...)
    Failed { exit_status: i32, stderr: String },
}

/// Sanitized remote path; a rejected one is recorded against the session
pub(crate) async fn checked_path(session: &mut RemoteSession, path: &str) -> Result<String> {
    match sanitize_path(path) {
        Ok(path) => Ok(path),
        Err(e) => Err(session.reject(e).await),
    }
}

pub fn is_protected(path: &str) -> bool {
    PROTECTED_FILES.contains(&path)
}

/// `ls -la` every directory in one session.
///
/// A directory that cannot be listed is reported in its entry, not as an error.
pub async fn list_directories(
    session: &mut RemoteSession,
    directories: &[String],
) -> Result<Vec<DirectoryListing>> {
    let mut listings = Vec::with_capacity(directories.len());

    for directory in directories {
        let directory = checked_path(session, directory).await?;
        let output = session.exec(&format!("ls -la -- {}", quote(&directory))).await?;

        let entries = if output.success() {
            output.stdout_text().lines().map(str::to_string).collect()
        } else {
            vec![format!(
                "Error listing directory: {}",
                output.stderr_text().trim()
            )]
        };

        listings.push(DirectoryListing {
            directory,
            entries,
            exit_status: output.exit_status,
        });
    }

    Ok(listings)
}

/// `cat` a remote file. A non-zero exit is returned as data.
pub async fn read_file(session: &mut RemoteSession, path: &str) -> Result<CommandResult> {
    let path = checked_path(session, path).await?;
    session.exec(&format!("cat -- {}", quote(&path))).await
}

/// Read a file that is not readable by the session's principal.
///
/// Opens the file up to [`READABLE_MODE`], reads it and puts the original
/// mode back. The original mode is read first and falls back to
/// [`FALLBACK_PROTECTED_MODE`] when it cannot be read.
pub async fn read_protected_file(
    session: &mut RemoteSession,
    path: &str,
) -> Result<ActionResult<CommandResult>> {
    let path = checked_path(session, path).await?;

    let original = match current_mode(session, &path).await? {
        Some(mode) => mode,
        None => {
            debug!("Could not read mode of {}, assuming {}", path, FALLBACK_PROTECTED_MODE);
            FALLBACK_PROTECTED_MODE.to_string()
        }
    };

    let window = PrivilegeWindow::chmod(&path, &original, READABLE_MODE, session.sudo_password());
    info!("Reading protected file {} (mode {})", path, original);

    let read_path = path.clone();
    let result = run_elevated(session, &window, move |session| {
        Box::pin(async move { read_file(session, &read_path).await })
    })
    .await;

    Ok(result)
}

/// Case-insensitive fixed-string search for `keyword` in a remote file
pub async fn search_file(
    session: &mut RemoteSession,
    path: &str,
    keyword: &str,
) -> Result<SearchMatches> {
    let path = checked_path(session, path).await?;
    if keyword.is_empty() {
        let err = CtfKitError::invalid_params("Keyword cannot be empty");
        return Err(session.reject(err).await);
    }

    let command = format!("grep -i -F -- {} {}", quote(keyword), quote(&path));
    let output = session.exec(&command).await?;

    Ok(match output.exit_status {
        0 => SearchMatches::Found(output.stdout_text().lines().map(str::to_string).collect()),
        1 => SearchMatches::NoMatches,
        exit_status => SearchMatches::Failed {
            exit_status,
            stderr: output.stderr_text().trim().to_string(),
        },
    })
}
