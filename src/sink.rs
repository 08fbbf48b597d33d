//! Append-only result persistence
//!
//! Every component reports outcomes through a [`ResultSink`]. The file-backed
//! sink writes one log line per record plus one plain-text artifact per
//! completed operation. Nothing in the crate reads records back.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{CtfKitError, Result};

/// Name of the append-only event log inside the log directory
pub const LOG_FILE_NAME: &str = "ctfkit.log";

/// Severity of a result record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warn,
    Error,
    /// Something may have been left in an insecure state
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// One immutable entry of the audit trail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: String,
    pub payload: String,
}

impl ResultRecord {
    /// Create a record stamped with the current time
    pub fn new(severity: Severity, category: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            category: category.into(),
            payload: payload.into(),
        }
    }

    /// Render as a single log line (embedded newlines are escaped)
    pub fn to_line(&self) -> String {
        format!(
            "{} - {} - {} - {}\n",
            self.timestamp.to_rfc3339(),
            self.severity,
            self.category,
            self.payload.replace('\n', "\\n")
        )
    }
}

/// Write-only destination for records and operation artifacts
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Append one record
    async fn record(&self, record: ResultRecord) -> Result<()>;

    /// Persist the human-readable result of a completed operation
    async fn save_artifact(&self, category: &str, contents: &str) -> Result<PathBuf>;

    /// Make everything written so far durable
    async fn flush(&self) -> Result<()>;
}

/// Record an event, downgrading a sink failure to a tracing warning.
///
/// Callers already hold the typed outcome they are about to return, so a
/// failing log write must not replace it.
pub async fn note(sink: &dyn ResultSink, severity: Severity, category: &str, payload: impl Into<String>) {
    let record = ResultRecord::new(severity, category, payload);
    if let Err(e) = sink.record(record).await {
        warn!("Failed to append result record ({}): {}", category, e);
    }
}

/// Same as [`note`] for an error outcome
pub async fn note_error(sink: &dyn ResultSink, category: &str, error: &CtfKitError) {
    let severity = match error {
        CtfKitError::PrivilegeRestoreFailure { .. } => Severity::Critical,
        CtfKitError::Cancelled => Severity::Warn,
        _ => Severity::Error,
    };
    note(sink, severity, category, error.to_string()).await;
}

/// Record `error` under `category` and hand it back for returning
pub async fn record_failure(sink: &dyn ResultSink, category: &str, error: CtfKitError) -> CtfKitError {
    note_error(sink, category, &error).await;
    error
}

/// Sink appending to `<log_dir>/ctfkit.log` and writing artifacts into `output_dir`
pub struct FileResultSink {
    log_path: PathBuf,
    output_dir: PathBuf,
    /// Serialises appends and artifact creation so audit order holds
    log: Mutex<File>,
}

impl FileResultSink {
    /// Create both directories if needed and open the log for appending
    pub async fn open(log_dir: &Path, output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir).await?;
        fs::create_dir_all(output_dir).await?;

        let log_path = log_dir.join(LOG_FILE_NAME);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|e| {
                CtfKitError::config(format!("Log file {} is not writable: {}", log_path.display(), e))
            })?;

        debug!("Result log opened at {}", log_path.display());

        Ok(Self {
            log_path,
            output_dir: output_dir.to_path_buf(),
            log: Mutex::new(log),
        })
    }

    /// Path of the event log
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[async_trait]
impl ResultSink for FileResultSink {
    async fn record(&self, record: ResultRecord) -> Result<()> {
        let mut log = self.log.lock().await;
        log.write_all(record.to_line().as_bytes()).await?;
        Ok(())
    }

    async fn save_artifact(&self, category: &str, contents: &str) -> Result<PathBuf> {
        let _guard = self.log.lock().await;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let mut path = self.output_dir.join(format!("{}_{}.txt", category, stamp));
        let mut suffix = 1;
        while fs::try_exists(&path).await.unwrap_or(false) {
            suffix += 1;
            path = self
                .output_dir
                .join(format!("{}_{}_{}.txt", category, stamp, suffix));
        }

        fs::write(&path, contents).await?;
        debug!("Artifact written to {}", path.display());
        Ok(path)
    }

    async fn flush(&self) -> Result<()> {
        let mut log = self.log.lock().await;
        log.flush().await?;
        log.sync_data().await?;
        Ok(())
    }
}

/// In-memory sink, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ResultRecord>>,
    artifacts: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records written so far
    pub async fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().await.clone()
    }

    /// Snapshot of all `(category, contents)` artifacts written so far
    pub async fn artifacts(&self) -> Vec<(String, String)> {
        self.artifacts.lock().await.clone()
    }

    /// Records of one category
    pub async fn records_in(&self, category: &str) -> Vec<ResultRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.category == category)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&self, record: ResultRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn save_artifact(&self, category: &str, contents: &str) -> Result<PathBuf> {
        let mut artifacts = self.artifacts.lock().await;
        artifacts.push((category.to_string(), contents.to_string()));
        Ok(PathBuf::from(format!("memory/{}_{}.txt", category, artifacts.len())))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
