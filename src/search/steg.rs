//! Steganography passphrase recovery
//!
//! Wraps steghide: a detection pass (`steghide info`) and a first-match
//! search over a wordlist where each candidate drives one `steghide extract`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{Apply, AttemptFuture, CandidateSearch, SearchPolicy, Verifier, Wordlist};
use crate::cancel::CancelToken;
use crate::error::{CtfKitError, Result};
use crate::external::{steghide_extract, steghide_info, Launcher, ToolRunner, STEGHIDE};
use crate::sink::{note, record_failure, ResultSink, Severity};

/// Sink and artifact category
pub const STEG_CATEGORY: &str = "steg";

/// File name steghide extracts into, inside the output directory
pub const EXTRACTED_FILE_NAME: &str = "extracted_data.txt";

/// Phrases steghide prints when a cover file carries nothing
const NO_DATA_MARKERS: [&str; 2] = ["no embedded data", "nothing to do"];

/// Outcome of `steghide info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenDataReport {
    pub image: PathBuf,
    pub hidden_data: bool,
    /// steghide's own output, for the operator
    pub output: String,
}

/// Whether steghide's output says the cover file carries no data
pub fn reports_no_data(output: &str) -> bool {
    let output = output.to_lowercase();
    NO_DATA_MARKERS.iter().any(|marker| output.contains(marker))
}

fn require_image(image: &Path) -> Result<()> {
    if image.is_file() {
        Ok(())
    } else {
        Err(CtfKitError::invalid_params(format!(
            "Image file not found: {}",
            image.display()
        )))
    }
}

/// Ask steghide whether `image` carries embedded data
pub async fn check_hidden_data(
    runner: &ToolRunner,
    sink: &dyn ResultSink,
    image: &Path,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<HiddenDataReport> {
    if let Err(e) = require_image(image) {
        return Err(record_failure(sink, STEG_CATEGORY, e).await);
    }

    let output = runner.run(&steghide_info(image), timeout, cancel).await?;
    let text = output.combined_output();
    let hidden_data = !reports_no_data(&text);

    let verdict = if hidden_data {
        "Hidden data detected"
    } else {
        "No hidden data"
    };
    info!("{} in {}", verdict, image.display());
    note(
        sink,
        Severity::Info,
        STEG_CATEGORY,
        format!("{} in {}", verdict, image.display()),
    )
    .await;

    Ok(HiddenDataReport {
        image: image.to_path_buf(),
        hidden_data,
        output: text,
    })
}

/// What one extraction attempt produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extraction {
    pub exit_status: i32,
    /// Size of the extracted file (0 when none was written)
    pub extracted_bytes: u64,
}

impl Extraction {
    /// steghide exited cleanly and wrote something
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0 && self.extracted_bytes > 0
    }
}

/// Applies one passphrase per attempt via `steghide extract`
pub struct StegCracker {
    runner: ToolRunner,
    launcher: Launcher,
    image: PathBuf,
    output: PathBuf,
    timeout: Duration,
    cancel: CancelToken,
}

impl StegCracker {
    pub fn new(
        runner: &ToolRunner,
        image: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            runner: runner.quiet(),
            launcher: Launcher::binary(STEGHIDE),
            image: image.into(),
            output: output.into(),
            timeout,
            cancel,
        }
    }

    /// Start a steghide-compatible replacement instead of `steghide`
    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// File each attempt extracts into
    pub fn output(&self) -> &Path {
        &self.output
    }

    async fn extract(&self, passphrase: &str) -> Result<Extraction> {
        // A file left by an earlier attempt must not count as this one's output
        match tokio::fs::remove_file(&self.output).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let invocation =
            steghide_extract(&self.image, &self.output, passphrase).launched_by(&self.launcher);
        let output = self.runner.run(&invocation, self.timeout, &self.cancel).await?;

        let extracted_bytes = match tokio::fs::metadata(&self.output).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        Ok(Extraction {
            exit_status: output.exit_status,
            extracted_bytes,
        })
    }
}

impl Apply<String, Extraction> for StegCracker {
    fn apply<'a>(&'a mut self, candidate: &'a String) -> AttemptFuture<'a, Extraction> {
        Box::pin(self.extract(candidate))
    }
}

/// Result of a passphrase search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrackReport {
    pub passphrase: Option<String>,
    /// File holding the extracted payload when a passphrase was found
    pub extracted_to: Option<PathBuf>,
    pub attempts: usize,
    pub last_error: Option<String>,
}

impl CrackReport {
    pub fn found(&self) -> bool {
        self.passphrase.is_some()
    }
}

/// Try every passphrase in `wordlist` against `image` until one extracts data.
///
/// The payload lands in `<output_dir>/extracted_data.txt`.
#[allow(clippy::too_many_arguments)]
pub async fn crack(
    runner: &ToolRunner,
    sink: Arc<dyn ResultSink>,
    cancel: CancelToken,
    image: &Path,
    wordlist: &Wordlist,
    output_dir: &Path,
    tool_timeout: Duration,
    policy: SearchPolicy,
) -> Result<CrackReport> {
    if let Err(e) = require_image(image) {
        return Err(record_failure(sink.as_ref(), STEG_CATEGORY, e).await);
    }
    if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
        return Err(record_failure(sink.as_ref(), STEG_CATEGORY, e.into()).await);
    }

    let output = output_dir.join(EXTRACTED_FILE_NAME);
    let cracker = StegCracker::new(runner, image, output, tool_timeout, cancel.clone());
    crack_with(cracker, sink, cancel, wordlist, policy).await
}

/// Passphrase search with a prepared cracker; the image must exist
pub async fn crack_with(
    mut cracker: StegCracker,
    sink: Arc<dyn ResultSink>,
    cancel: CancelToken,
    wordlist: &Wordlist,
    policy: SearchPolicy,
) -> Result<CrackReport> {
    let image = cracker.image().to_path_buf();
    let output = cracker.output().to_path_buf();
    let verify: &Verifier<Extraction> = &|extraction: &Extraction| extraction.succeeded();

    let search = CandidateSearch::new(sink.clone(), cancel, STEG_CATEGORY);
    let outcome = search
        .run(wordlist, &mut cracker, Some(verify), &policy)
        .await?;

    let report = CrackReport {
        extracted_to: outcome.found.then(|| output.clone()),
        passphrase: outcome.winning_candidate,
        attempts: outcome.attempts_tried,
        last_error: outcome.last_error,
    };

    let summary = match &report.passphrase {
        Some(passphrase) => format!(
            "Image: {}\nPassphrase: {}\nExtracted to: {}\nAttempts: {}\n",
            image.display(),
            passphrase,
            output.display(),
            report.attempts
        ),
        None => format!(
            "Image: {}\nNo passphrase found in {} after {} attempts\n",
            image.display(),
            wordlist.path().display(),
            report.attempts
        ),
    };
    if let Err(e) = sink.save_artifact(STEG_CATEGORY, &summary).await {
        return Err(record_failure(sink.as_ref(), STEG_CATEGORY, e).await);
    }
    Ok(report)
}
