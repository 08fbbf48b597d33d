//! Remote execution module
//!
//! The shell capability traits, their russh implementation, the guarded
//! session built on top, privilege windows, file exploration and forensic
//! helpers.

pub mod files;
pub mod forensics;
pub mod handler;
pub mod privilege;
pub mod sanitize;
pub mod session;
pub mod shell;
pub mod ssh;

// Re-exports
pub use files::{DirectoryListing, SearchMatches};
pub use handler::SshHandler;
pub use privilege::{run_elevated, ActionResult, PrivilegeWindow};
pub use sanitize::{escape_for_shell, quote, sanitize_command, wrap_sudo_command};
pub use session::{
    Direction, RemoteSession, SessionFuture, SessionManager, SessionOptions, SessionState,
};
pub use shell::{CommandResult, Credential, RemoteShell, Secret, ShellHandle};
pub use ssh::SshShell;
