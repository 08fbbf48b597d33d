//! Brute-force candidate search
//!
//! [`CandidateSearch::run`] walks a [`CandidateSource`] in order, applies each
//! candidate and, depending on the [`SearchMode`], stops at the first output
//! the verifier accepts or enumerates every candidate.
//!
//! Two instantiations ship with the crate: rotation-cipher recovery
//! ([`caesar`], exhaustive) and steganography passphrase recovery
//! ([`steg`], first match).

pub mod caesar;
pub mod source;
pub mod steg;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{CtfKitError, Result};
use crate::sink::{note, note_error, ResultSink, Severity};

pub use source::{CandidateSource, ShiftRange, VecSource, Wordlist};

/// Future returned by one attempt
pub type AttemptFuture<'a, O> = Pin<Box<dyn Future<Output = Result<O>> + Send + 'a>>;

/// Success predicate over an attempt's output
pub type Verifier<O> = dyn Fn(&O) -> bool + Send + Sync;

/// The step applied to every candidate.
///
/// Implementations may hold a `&mut RemoteSession` or drive an external tool.
pub trait Apply<C, O>: Send {
    fn apply<'a>(&'a mut self, candidate: &'a C) -> AttemptFuture<'a, O>;
}

/// Adapter turning a synchronous transform into an [`Apply`]
pub struct Transform<F>(pub F);

impl<C, O, F> Apply<C, O> for Transform<F>
where
    F: FnMut(&C) -> Result<O> + Send,
    O: Send + 'static,
{
    fn apply<'a>(&'a mut self, candidate: &'a C) -> AttemptFuture<'a, O> {
        let output = (self.0)(candidate);
        Box::pin(std::future::ready(output))
    }
}

/// Stopping rule of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Stop at the first verified output; requires a verifier
    FirstMatch,
    /// Apply every candidate and keep every output; no verifier
    ExhaustiveEnumerate,
}

/// How a search runs and what it records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPolicy {
    pub mode: SearchMode,
    /// Record every attempt, not only the final outcome
    pub persist_all: bool,
    /// An attempt running longer than this counts as failed
    pub attempt_timeout: Option<Duration>,
}

impl SearchPolicy {
    pub fn first_match() -> Self {
        Self {
            mode: SearchMode::FirstMatch,
            persist_all: false,
            attempt_timeout: None,
        }
    }

    pub fn exhaustive_enumerate() -> Self {
        Self {
            mode: SearchMode::ExhaustiveEnumerate,
            persist_all: true,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn persist_attempts(mut self, persist_all: bool) -> Self {
        self.persist_all = persist_all;
        self
    }
}

/// One applied candidate and what came of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt<C, O> {
    pub candidate: C,
    pub result: std::result::Result<O, String>,
}

/// Result of a finished search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome<C, O> {
    pub found: bool,
    pub winning_candidate: Option<C>,
    pub winning_output: Option<O>,
    pub attempts_tried: usize,
    pub last_error: Option<String>,
    /// Every attempt in input order (exhaustive mode only)
    pub enumerated: Vec<Attempt<C, O>>,
}

impl<C, O> SearchOutcome<C, O> {
    fn empty() -> Self {
        Self {
            found: false,
            winning_candidate: None,
            winning_output: None,
            attempts_tried: 0,
            last_error: None,
            enumerated: Vec::new(),
        }
    }
}

/// Await `work`, giving up after `limit`. `None` means it timed out.
async fn within<T>(limit: Option<Duration>, work: impl Future<Output = T>) -> Option<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, work).await.ok(),
        None => Some(work.await),
    }
}

/// Drives searches and reports them under one sink category
#[derive(Clone)]
pub struct CandidateSearch {
    sink: Arc<dyn ResultSink>,
    cancel: CancelToken,
    category: String,
}

impl CandidateSearch {
    pub fn new(sink: Arc<dyn ResultSink>, cancel: CancelToken, category: impl Into<String>) -> Self {
        Self {
            sink,
            cancel,
            category: category.into(),
        }
    }

    async fn fail(&self, err: CtfKitError) -> CtfKitError {
        note_error(self.sink.as_ref(), &self.category, &err).await;
        err
    }

    /// Run a search.
    ///
    /// The policy and the source are validated before the first candidate is
    /// applied: a first-match search without a verifier, a source that cannot
    /// be opened and an empty source all fail without trying anything.
    pub async fn run<S, A, O>(
        &self,
        source: &S,
        apply: &mut A,
        verify: Option<&Verifier<O>>,
        policy: &SearchPolicy,
    ) -> Result<SearchOutcome<S::Candidate, O>>
    where
        S: CandidateSource,
        A: Apply<S::Candidate, O>,
        O: Send,
    {
        let verify = match (policy.mode, verify) {
            (SearchMode::FirstMatch, None) => {
                let err = CtfKitError::invalid_params("First-match search needs a verifier");
                return Err(self.fail(err).await);
            }
            (SearchMode::FirstMatch, Some(verify)) => Some(verify),
            (SearchMode::ExhaustiveEnumerate, _) => None,
        };

        let mut candidates = match source.candidates() {
            Ok(candidates) => candidates.peekable(),
            Err(e) => return Err(self.fail(e).await),
        };
        if candidates.peek().is_none() {
            let err = CtfKitError::candidate_source(format!("{} is empty", source.describe()));
            return Err(self.fail(err).await);
        }

        info!("Starting {:?} search over {}", policy.mode, source.describe());
        let mut outcome = SearchOutcome::empty();

        for candidate in candidates {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(outcome.attempts_tried).await);
            }
            outcome.attempts_tried += 1;
            let attempt_no = outcome.attempts_tried;

            let attempt = apply.apply(&candidate);
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                res = within(policy.attempt_timeout, attempt) => Some(res),
            };

            let result = match result {
                None => return Err(self.cancelled(attempt_no).await),
                Some(None) => {
                    let limit = policy.attempt_timeout.unwrap_or_default();
                    Err(CtfKitError::Timeout(
                        u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    ))
                }
                Some(Some(result)) => result,
            };

            let output = match result {
                Ok(output) => output,
                Err(e) if e.is_cancelled() => return Err(self.cancelled(attempt_no).await),
                Err(e) => {
                    debug!("Attempt {} failed: {}", attempt_no, e);
                    if policy.persist_all {
                        self.record_attempt(attempt_no, &candidate, &format!("failed: {}", e))
                            .await;
                    }
                    outcome.last_error = Some(e.to_string());
                    if policy.mode == SearchMode::ExhaustiveEnumerate {
                        outcome.enumerated.push(Attempt {
                            candidate,
                            result: Err(e.to_string()),
                        });
                    }
                    continue;
                }
            };

            match verify {
                Some(verify) => {
                    let success = verify(&output);
                    if policy.persist_all {
                        let verdict = if success { "verified" } else { "rejected" };
                        self.record_attempt(attempt_no, &candidate, verdict).await;
                    }
                    if success {
                        info!("Candidate {} succeeded after {} attempts", candidate, attempt_no);
                        note(
                            self.sink.as_ref(),
                            Severity::Info,
                            &self.category,
                            format!(
                                "Found '{}' in {} after {} attempts",
                                candidate,
                                source.describe(),
                                attempt_no
                            ),
                        )
                        .await;
                        outcome.found = true;
                        outcome.winning_candidate = Some(candidate);
                        outcome.winning_output = Some(output);
                        return Ok(outcome);
                    }
                }
                None => {
                    if policy.persist_all {
                        self.record_attempt(attempt_no, &candidate, "applied").await;
                    }
                    outcome.enumerated.push(Attempt {
                        candidate,
                        result: Ok(output),
                    });
                }
            }
        }

        match policy.mode {
            SearchMode::FirstMatch => {
                warn!(
                    "No candidate from {} succeeded ({} attempts)",
                    source.describe(),
                    outcome.attempts_tried
                );
                note(
                    self.sink.as_ref(),
                    Severity::Warn,
                    &self.category,
                    format!(
                        "No match in {} after {} attempts{}",
                        source.describe(),
                        outcome.attempts_tried,
                        outcome
                            .last_error
                            .as_deref()
                            .map(|e| format!(" (last error: {})", e))
                            .unwrap_or_default()
                    ),
                )
                .await;
            }
            SearchMode::ExhaustiveEnumerate => {
                note(
                    self.sink.as_ref(),
                    Severity::Info,
                    &self.category,
                    format!(
                        "Enumerated {} candidates from {}",
                        outcome.attempts_tried,
                        source.describe()
                    ),
                )
                .await;
            }
        }

        Ok(outcome)
    }

    async fn record_attempt(&self, attempt_no: usize, candidate: &impl std::fmt::Display, verdict: &str) {
        note(
            self.sink.as_ref(),
            Severity::Info,
            &self.category,
            format!("Attempt {}: {} -> {}", attempt_no, candidate, verdict),
        )
        .await;
    }

    async fn cancelled(&self, attempts: usize) -> CtfKitError {
        warn!("Search cancelled after {} attempts", attempts);
        self.fail(CtfKitError::Cancelled).await
    }
}
