//! External security tools
//!
//! Runs local binaries (nmap, gobuster, steghide, john) as child processes with a
//! bounded lifetime. Output is captured as bytes; a non-zero exit is data.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use crate::cancel::CancelToken;
use crate::error::{CtfKitError, Result};
use crate::remote::CommandResult;
use crate::scope::AuthorizedTarget;
use crate::sink::{note, record_failure, ResultSink, Severity};

/// Sink category for external tool runs
pub const TOOL_CATEGORY: &str = "tools";

/// Default steganography tool
pub const STEGHIDE: &str = "steghide";

/// Password cracker
pub const JOHN: &str = "john";

/// Status codes gobuster treats as "not found"
pub const GOBUSTER_BLACKLIST: &str = "302,404";

/// Extensions appended to every gobuster word
pub const GOBUSTER_EXTENSIONS: &str = "php,txt,html,js";

/// Captured result of a finished tool
pub type ToolOutput = CommandResult;

/// One program invocation. Arguments marked secret print as `***`.
#[derive(Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    program: String,
    args: Vec<String>,
    secret: Vec<usize>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Argument kept out of logs and records
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Start through `launcher` instead of the default binary
    pub fn launched_by(mut self, launcher: &Launcher) -> Self {
        let shift = launcher.leading.len();
        self.program = launcher.program.clone();
        self.secret.iter_mut().for_each(|i| *i += shift);
        self.args.splice(0..0, launcher.leading.iter().cloned());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret.contains(&i) {
                f.write_str(" ***")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ToolInvocation({})", self)
    }
}

/// Executable a tool is started through: the binary itself, or an
/// interpreter running a script that accepts the same arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    program: String,
    leading: Vec<String>,
}

impl Launcher {
    pub fn binary(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading: Vec::new(),
        }
    }

    pub fn script(interpreter: impl Into<String>, script: &Path) -> Self {
        Self {
            program: interpreter.into(),
            leading: vec![script.display().to_string()],
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// `nmap -sS -vv -T4 <ip>`
pub fn nmap_syn_scan(target: &AuthorizedTarget) -> ToolInvocation {
    ToolInvocation::new("nmap")
        .args(["-sS", "-vv", "-T4"])
        .arg(target.ip().to_string())
}

/// Directory brute force against `url`
pub fn gobuster_dir(url: &Url, wordlist: &Path) -> ToolInvocation {
    ToolInvocation::new("gobuster")
        .arg("dir")
        .args(["-u", url.as_str()])
        .arg("-w")
        .arg(wordlist.display().to_string())
        .args(["-b", GOBUSTER_BLACKLIST, "-x", GOBUSTER_EXTENSIONS, "-k"])
}

/// `steghide info <file>`
pub fn steghide_info(file: &Path) -> ToolInvocation {
    ToolInvocation::new(STEGHIDE)
        .arg("info")
        .arg(file.display().to_string())
}

/// `steghide extract` into `out` with one passphrase, overwriting `out`
pub fn steghide_extract(file: &Path, out: &Path, passphrase: &str) -> ToolInvocation {
    ToolInvocation::new(STEGHIDE)
        .arg("extract")
        .arg("-sf")
        .arg(file.display().to_string())
        .arg("-xf")
        .arg(out.display().to_string())
        .arg("-p")
        .secret_arg(passphrase)
        .arg("-f")
}

/// `john --format=<format> --wordlist=<wordlist> <hash_file>`
pub fn john_crack(hash_file: &Path, wordlist: &Path, format: &str) -> ToolInvocation {
    ToolInvocation::new(JOHN)
        .arg(format!("--format={}", format))
        .arg(format!("--wordlist={}", wordlist.display()))
        .arg(hash_file.display().to_string())
}

/// `john --show --format=<format> <hash_file>`
pub fn john_show(hash_file: &Path, format: &str) -> ToolInvocation {
    ToolInvocation::new(JOHN)
        .arg("--show")
        .arg(format!("--format={}", format))
        .arg(hash_file.display().to_string())
}

/// Spawns tools and reports tool-side failures to the sink
#[derive(Clone)]
pub struct ToolRunner {
    sink: Arc<dyn ResultSink>,
    record_failures: bool,
}

impl ToolRunner {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self {
            sink,
            record_failures: true,
        }
    }

    /// Runner whose caller records failures itself, for tools run once per
    /// candidate where failure is the common case. Timeouts and cancellation
    /// are still recorded.
    pub fn quiet(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            record_failures: false,
        }
    }

    /// Run `invocation` to completion.
    ///
    /// The child is killed when `timeout` elapses or `cancel` fires.
    pub async fn run(
        &self,
        invocation: &ToolInvocation,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ToolOutput> {
        debug!("Running {}", invocation);

        let spawned = Command::new(invocation.program())
            .args(invocation.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let err =
                    CtfKitError::tool(format!("Failed to start {}: {}", invocation.program(), e));
                return Err(self.fail(err).await);
            }
        };

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(timeout, child.wait_with_output()) => Some(res),
        };

        let output = match waited {
            None => {
                note(
                    self.sink.as_ref(),
                    Severity::Warn,
                    TOOL_CATEGORY,
                    format!("Cancelled: {}", invocation),
                )
                .await;
                return Err(CtfKitError::Cancelled);
            }
            Some(Err(_)) => {
                let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!("{} timed out after {}ms", invocation.program(), ms);
                note(
                    self.sink.as_ref(),
                    Severity::Error,
                    TOOL_CATEGORY,
                    format!("Timed out after {}ms: {}", ms, invocation),
                )
                .await;
                return Err(CtfKitError::Timeout(ms));
            }
            Some(Ok(Ok(output))) => output,
            Some(Ok(Err(e))) => {
                let err = CtfKitError::tool(format!(
                    "Failed to collect output of {}: {}",
                    invocation.program(),
                    e
                ));
                return Err(self.fail(err).await);
            }
        };

        let result = CommandResult::new(
            output.status.code().unwrap_or(-1),
            output.stdout,
            output.stderr,
        );

        if !result.success() && self.record_failures {
            note(
                self.sink.as_ref(),
                Severity::Warn,
                TOOL_CATEGORY,
                format!(
                    "tool-reported failure: {} exited with {}",
                    invocation, result.exit_status
                ),
            )
            .await;
        }

        Ok(result)
    }

    async fn fail(&self, err: CtfKitError) -> CtfKitError {
        if self.record_failures {
            record_failure(self.sink.as_ref(), TOOL_CATEGORY, err).await
        } else {
            err
        }
    }
}
