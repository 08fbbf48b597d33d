//! Error types for ctfkit

use thiserror::Error;

/// Main error type for ctfkit operations
///
/// A command that runs and exits non-zero is not an error: its status travels
/// in [`CommandResult`](crate::remote::CommandResult) for the caller to read.
#[derive(Debug, Error)]
pub enum CtfKitError {
    /// Target is outside the authorized address ranges
    #[error("Scope violation for '{target}': {reason}")]
    ScopeViolation { target: String, reason: String },

    /// SSH connection failed
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication failed (password or key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// File copy between the local and remote host failed
    #[error("Transfer failed: {0}")]
    TransferFailure(String),

    /// Elevating access on a resource failed before the action ran
    #[error("Elevation failed: {0}")]
    ElevationFailed(String),

    /// Restoring the access mode of a resource failed
    #[error(
        "Privilege restore failed on {resource}: expected mode {expected_mode}, {detail}"
    )]
    PrivilegeRestoreFailure {
        resource: String,
        expected_mode: String,
        detail: String,
    },

    /// Candidate source missing, unreadable or empty
    #[error("Candidate source error: {0}")]
    CandidateSource(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Operator cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// External tool could not be started
    #[error("External tool error: {0}")]
    Tool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Result type alias using CtfKitError
pub type Result<T> = std::result::Result<T, CtfKitError>;

impl CtfKitError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        CtfKitError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        CtfKitError::Authentication(msg.into())
    }

    /// Create a transfer error from a string
    pub fn transfer(msg: impl Into<String>) -> Self {
        CtfKitError::TransferFailure(msg.into())
    }

    /// Create an elevation failed error from a string
    pub fn elevation_failed(msg: impl Into<String>) -> Self {
        CtfKitError::ElevationFailed(msg.into())
    }

    /// Create a candidate source error from a string
    pub fn candidate_source(msg: impl Into<String>) -> Self {
        CtfKitError::CandidateSource(msg.into())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        CtfKitError::InvalidParams(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        CtfKitError::Config(msg.into())
    }

    /// Create an external tool error from a string
    pub fn tool(msg: impl Into<String>) -> Self {
        CtfKitError::Tool(msg.into())
    }

    /// Inside a candidate search only cancellation stops the loop; every
    /// other per-candidate error counts as a failed attempt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CtfKitError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CtfKitError::Connection("failed to connect".to_string());
        assert_eq!(err.to_string(), "SSH connection error: failed to connect");

        let err = CtfKitError::Timeout(5000);
        assert_eq!(err.to_string(), "Timeout after 5000ms");
    }

    #[test]
    fn test_scope_violation_display() {
        let err = CtfKitError::ScopeViolation {
            target: "8.8.8.8".to_string(),
            reason: "public address".to_string(),
        };
        assert_eq!(err.to_string(), "Scope violation for '8.8.8.8': public address");
    }

    #[test]
    fn test_restore_failure_names_resource_and_mode() {
        let err = CtfKitError::PrivilegeRestoreFailure {
            resource: "/etc/shadow".to_string(),
            expected_mode: "000".to_string(),
            detail: "found 644".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("/etc/shadow"));
        assert!(text.contains("expected mode 000"));
        assert!(text.contains("found 644"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(CtfKitError::Cancelled.is_cancelled());
        assert!(!CtfKitError::Timeout(1).is_cancelled());
    }
}
