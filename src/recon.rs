//! Network reconnaissance with local tools
//!
//! Port scanning and web content discovery. Both pass their target through
//! the [`ScopeGuard`] before any process is started.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use url::{Host, Url};

use crate::cancel::CancelToken;
use crate::error::{CtfKitError, Result};
use crate::external::{gobuster_dir, nmap_syn_scan, ToolInvocation, ToolOutput, ToolRunner};
use crate::scope::{AuthorizedTarget, ScopeGuard};
use crate::search::{CandidateSource, Wordlist};
use crate::sink::{note, record_failure, ResultSink, Severity};

/// Sink and artifact category of port scans
pub const NMAP_CATEGORY: &str = "nmap";

/// Sink and artifact category of directory brute forcing
pub const GOBUSTER_CATEGORY: &str = "gobuster";

/// A finished scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub target: String,
    pub output: ToolOutput,
    pub artifact: PathBuf,
}

/// Parse a web target and authorize its host.
///
/// A bare address is taken as `http://<address>`. The host must be an IP
/// literal inside the authorized ranges; names are refused.
pub async fn authorize_url(guard: &ScopeGuard, raw: &str) -> Result<(Url, AuthorizedTarget)> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| CtfKitError::invalid_params(format!("Invalid URL '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CtfKitError::invalid_params(format!(
            "Unsupported URL scheme '{}'",
            url.scheme()
        )));
    }

    let host = match url.host() {
        Some(Host::Ipv6(ip)) => ip.to_string(),
        Some(host) => host.to_string(),
        None => String::new(),
    };
    let target = guard.authorize(&host).await.into_result()?;
    Ok((url, target))
}

/// Scope-guarded nmap and gobuster runs
#[derive(Clone)]
pub struct Recon {
    guard: ScopeGuard,
    runner: ToolRunner,
    sink: Arc<dyn ResultSink>,
}

impl Recon {
    pub fn new(guard: ScopeGuard, runner: ToolRunner, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            guard,
            runner,
            sink,
        }
    }

    /// SYN scan of one host
    pub async fn nmap(&self, target: &str, timeout: Duration, cancel: &CancelToken) -> Result<ScanReport> {
        let target = self.guard.authorize(target).await.into_result()?;
        info!("Starting nmap scan of {}", target);

        let invocation = nmap_syn_scan(&target);
        self.run(NMAP_CATEGORY, target.to_string(), &invocation, timeout, cancel)
            .await
    }

    /// Directory and file discovery on a web server
    pub async fn gobuster(
        &self,
        url: &str,
        wordlist: &Path,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ScanReport> {
        // Scope refusals are recorded by the guard itself
        let (url, _target) = match authorize_url(&self.guard, url).await {
            Ok(authorized) => authorized,
            Err(e @ CtfKitError::ScopeViolation { .. }) => return Err(e),
            Err(e) => return Err(self.fail(GOBUSTER_CATEGORY, e).await),
        };
        if let Err(e) = Wordlist::new(wordlist).validate() {
            return Err(self.fail(GOBUSTER_CATEGORY, e).await);
        }
        info!("Starting gobuster against {}", url);

        let invocation = gobuster_dir(&url, wordlist);
        self.run(GOBUSTER_CATEGORY, url.to_string(), &invocation, timeout, cancel)
            .await
    }

    async fn run(
        &self,
        category: &str,
        target: String,
        invocation: &ToolInvocation,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ScanReport> {
        let output = self.runner.run(invocation, timeout, cancel).await?;

        let saved = self
            .sink
            .save_artifact(
                category,
                &format!("$ {}\n\n{}", invocation, output.combined_output()),
            )
            .await;
        let artifact = match saved {
            Ok(path) => path,
            Err(e) => return Err(self.fail(category, e).await),
        };

        note(
            self.sink.as_ref(),
            Severity::Info,
            category,
            format!(
                "{} finished against {} (exit {}), saved to {}",
                invocation.program(),
                target,
                output.exit_status,
                artifact.display()
            ),
        )
        .await;

        Ok(ScanReport {
            target,
            output,
            artifact,
        })
    }

    async fn fail(&self, category: &str, err: CtfKitError) -> CtfKitError {
        record_failure(self.sink.as_ref(), category, err).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::TOOL_CATEGORY;
    use crate::scope::SCOPE_CATEGORY;
    use crate::sink::MemorySink;

    fn recon() -> (Recon, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let recon = Recon::new(
            ScopeGuard::new(sink.clone()),
            ToolRunner::new(sink.clone()),
            sink.clone(),
        );
        (recon, sink)
    }

    #[tokio::test]
    async fn test_authorize_url_forms() {
        let sink = Arc::new(MemorySink::new());
        let guard = ScopeGuard::new(sink.clone());

        let (url, target) = authorize_url(&guard, "10.10.10.5").await.unwrap();
        assert_eq!(url.as_str(), "http://10.10.10.5/");
        assert_eq!(target.address(), "10.10.10.5");

        let (url, _) = authorize_url(&guard, "https://192.168.1.20:8443/app").await.unwrap();
        assert_eq!(url.port(), Some(8443));

        assert!(sink.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_authorize_url_refuses_names_and_public_hosts() {
        let sink = Arc::new(MemorySink::new());
        let guard = ScopeGuard::new(sink.clone());

        let err = authorize_url(&guard, "http://example.com/").await.unwrap_err();
        assert!(err.to_string().contains("invalid address"));

        let err = authorize_url(&guard, "http://8.8.8.8/").await.unwrap_err();
        assert!(err.to_string().contains("public address"));

        assert_eq!(sink.records_in(SCOPE_CATEGORY).await.len(), 2);
    }

    #[tokio::test]
    async fn test_authorize_url_refuses_other_schemes() {
        let sink = Arc::new(MemorySink::new());
        let guard = ScopeGuard::new(sink.clone());

        let err = authorize_url(&guard, "ftp://10.0.0.1/").await.unwrap_err();
        assert!(matches!(err, CtfKitError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_nmap_out_of_scope_starts_nothing() {
        let (recon, sink) = recon();

        let err = recon
            .nmap("8.8.8.8", Duration::from_secs(5), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CtfKitError::ScopeViolation { .. }));
        assert!(sink.records_in(TOOL_CATEGORY).await.is_empty());
        assert!(sink.artifacts().await.is_empty());
        assert_eq!(sink.records_in(SCOPE_CATEGORY).await.len(), 1);
    }

    #[tokio::test]
    async fn test_gobuster_missing_wordlist() {
        let (recon, sink) = recon();

        let err = recon
            .gobuster(
                "http://10.0.0.8/",
                Path::new("/nonexistent/common.txt"),
                Duration::from_secs(5),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CtfKitError::CandidateSource(_)));
        let records = sink.records_in(GOBUSTER_CATEGORY).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Error);
        assert!(records[0].payload.contains("/nonexistent/common.txt"));
        assert!(sink.records_in(TOOL_CATEGORY).await.is_empty());
    }

    #[tokio::test]
    async fn test_gobuster_bad_scheme_is_recorded() {
        let (recon, sink) = recon();

        let err = recon
            .gobuster(
                "ftp://10.0.0.8/",
                Path::new("/nonexistent/common.txt"),
                Duration::from_secs(5),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CtfKitError::InvalidParams(_)));
        assert_eq!(sink.records_in(GOBUSTER_CATEGORY).await.len(), 1);
        assert!(sink.records_in(SCOPE_CATEGORY).await.is_empty());
    }
}
