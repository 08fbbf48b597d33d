//! Password hash cracking with John the Ripper
//!
//! The hash is written to a file in the output directory, john runs a
//! wordlist attack on it and `john --show` reports what was recovered.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::cancel::CancelToken;
use crate::error::{CtfKitError, Result};
use crate::external::{john_crack, john_show, Launcher, ToolRunner, JOHN};
use crate::search::{CandidateSource, Wordlist};
use crate::sink::{note, record_failure, ResultSink, Severity};

/// Sink and artifact category
pub const HASH_CATEGORY: &str = "hash-crack";

/// Format tried when the caller names none
pub const DEFAULT_HASH_FORMAT: &str = "Raw-MD5";

/// Wordlist used when the caller names none
pub const DEFAULT_HASH_WORDLIST: &str = "/usr/share/wordlists/rockyou.txt";

/// Outcome of one cracking run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashReport {
    pub hash: String,
    pub format: String,
    pub password: Option<String>,
    /// Output of `john --show`
    pub shown: String,
    pub artifact: PathBuf,
}

impl HashReport {
    pub fn cracked(&self) -> bool {
        self.password.is_some()
    }
}

/// A single hash: non-empty, one token
pub fn validate_hash(hash: &str) -> Result<String> {
    let hash = hash.trim();
    if hash.is_empty() {
        return Err(CtfKitError::invalid_params("Hash cannot be empty"));
    }
    if hash.chars().any(char::is_whitespace) {
        return Err(CtfKitError::invalid_params("Hash must be a single token"));
    }
    Ok(hash.to_string())
}

/// john format names are letters, digits, `-` and `_`
pub fn validate_format(format: &str) -> Result<()> {
    let valid = !format.is_empty()
        && format
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CtfKitError::invalid_params(format!(
            "Invalid hash format '{}'",
            format
        )))
    }
}

/// Password from `john --show` output.
///
/// Cracked entries print as `<id>:<password>`; the summary line after them
/// has no colon.
pub fn parse_john_show(output: &str) -> Option<String> {
    output
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .find_map(|line| line.split_once(':'))
        .map(|(_, password)| password.to_string())
}

/// Runs john against one hash at a time
#[derive(Clone)]
pub struct HashCracker {
    runner: ToolRunner,
    launcher: Launcher,
    output_dir: PathBuf,
    timeout: Duration,
}

impl HashCracker {
    pub fn new(runner: &ToolRunner, output_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runner: runner.clone(),
            launcher: Launcher::binary(JOHN),
            output_dir: output_dir.into(),
            timeout,
        }
    }

    /// Start a john-compatible replacement instead of `john`
    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    /// Crack `hash` with `wordlist`, record the outcome and save it as an
    /// artifact. "Nothing cracked" is a report, not an error.
    pub async fn crack(
        &self,
        sink: Arc<dyn ResultSink>,
        hash: &str,
        wordlist: &Path,
        format: &str,
        cancel: &CancelToken,
    ) -> Result<HashReport> {
        let checked = validate_hash(hash)
            .and_then(|hash| validate_format(format).map(|_| hash))
            .and_then(|hash| Wordlist::new(wordlist).validate().map(|_| hash));
        let hash = match checked {
            Ok(hash) => hash,
            Err(e) => return Err(record_failure(sink.as_ref(), HASH_CATEGORY, e).await),
        };

        let hash_file = match self.write_hash_file(&hash).await {
            Ok(path) => path,
            Err(e) => return Err(record_failure(sink.as_ref(), HASH_CATEGORY, e).await),
        };
        info!("Cracking {} hash with {}", format, wordlist.display());

        let attack = john_crack(&hash_file, wordlist, format).launched_by(&self.launcher);
        let output = self.runner.run(&attack, self.timeout, cancel).await?;
        if !output.success() {
            let err = CtfKitError::tool(format!(
                "john exited with {}: {}",
                output.exit_status,
                output.stderr_text().trim()
            ));
            return Err(record_failure(sink.as_ref(), HASH_CATEGORY, err).await);
        }

        let show = john_show(&hash_file, format).launched_by(&self.launcher);
        let shown = self
            .runner
            .run(&show, self.timeout, cancel)
            .await?
            .stdout_text();
        let password = parse_john_show(&shown);

        let body = if password.is_some() {
            shown.trim_end().to_string()
        } else {
            "No password cracked.".to_string()
        };
        let contents = format!("--- Cracked Hash: {} ---\n{}\n", hash, body);
        let artifact = match sink.save_artifact(HASH_CATEGORY, &contents).await {
            Ok(path) => path,
            Err(e) => return Err(record_failure(sink.as_ref(), HASH_CATEGORY, e).await),
        };

        match &password {
            Some(password) => {
                note(
                    sink.as_ref(),
                    Severity::Info,
                    HASH_CATEGORY,
                    format!("Cracked {} ({}): {}", hash, format, password),
                )
                .await
            }
            None => {
                note(
                    sink.as_ref(),
                    Severity::Warn,
                    HASH_CATEGORY,
                    format!(
                        "No password cracked for {} ({}) with {}",
                        hash,
                        format,
                        wordlist.display()
                    ),
                )
                .await
            }
        }

        Ok(HashReport {
            hash,
            format: format.to_string(),
            password,
            shown,
            artifact,
        })
    }

    async fn write_hash_file(&self, hash: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%f");
        let path = self.output_dir.join(format!("hash_{}.txt", stamp));
        tokio::fs::write(&path, format!("{}\n", hash)).await?;
        Ok(path)
    }
}
