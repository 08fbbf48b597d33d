//! Candidate sources
//!
//! A source hands out a fresh, finite, ordered iterator on every call to
//! [`CandidateSource::candidates`], so a search can be restarted.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use crate::error::{CtfKitError, Result};

/// Iterator type returned by candidate sources
pub type Candidates<'s, C> = Box<dyn Iterator<Item = C> + Send + 's>;

/// Lazy, restartable sequence of candidates
pub trait CandidateSource: Send + Sync {
    type Candidate: Clone + fmt::Display + Send + Sync;

    /// Short human-readable name used in records
    fn describe(&self) -> String;

    /// Open a fresh iterator. Fails if the backing data cannot be opened.
    fn candidates(&self) -> Result<Candidates<'_, Self::Candidate>>;

    /// Check the source can be opened and yields at least one candidate
    fn validate(&self) -> Result<()> {
        match self.candidates()?.next() {
            Some(_) => Ok(()),
            None => Err(CtfKitError::candidate_source(format!(
                "{} is empty",
                self.describe()
            ))),
        }
    }
}

/// Shift amounts for a rotation cipher (1..=25 by default)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftRange {
    range: RangeInclusive<u8>,
}

impl ShiftRange {
    pub fn new(range: RangeInclusive<u8>) -> Self {
        Self { range }
    }
}

impl Default for ShiftRange {
    /// Every non-identity shift of the Latin alphabet
    fn default() -> Self {
        Self::new(1..=25)
    }
}

impl CandidateSource for ShiftRange {
    type Candidate = u8;

    fn describe(&self) -> String {
        format!("shifts {}..={}", self.range.start(), self.range.end())
    }

    fn candidates(&self) -> Result<Candidates<'_, u8>> {
        Ok(Box::new(self.range.clone()))
    }
}

/// In-memory candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VecSource<C> {
    items: Vec<C>,
}

impl<C> VecSource<C> {
    pub fn new(items: Vec<C>) -> Self {
        Self { items }
    }
}

impl<C> CandidateSource for VecSource<C>
where
    C: Clone + fmt::Display + Send + Sync,
{
    type Candidate = C;

    fn describe(&self) -> String {
        format!("{} in-memory candidates", self.items.len())
    }

    fn candidates(&self) -> Result<Candidates<'_, C>> {
        Ok(Box::new(self.items.iter().cloned()))
    }
}

/// Plain-text wordlist, one candidate per line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wordlist {
    path: PathBuf,
}

impl Wordlist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CandidateSource for Wordlist {
    type Candidate = String;

    fn describe(&self) -> String {
        format!("wordlist {}", self.path.display())
    }

    /// Lines are read lazily. Invalid UTF-8 sequences are dropped from the
    /// line they appear in and a trailing `\r` is removed; reading stops at
    /// the first I/O error.
    fn candidates(&self) -> Result<Candidates<'_, String>> {
        if !self.path.is_file() {
            return Err(CtfKitError::candidate_source(format!(
                "Wordlist file not found: {}",
                self.path.display()
            )));
        }

        let file = File::open(&self.path).map_err(|e| {
            CtfKitError::candidate_source(format!(
                "Cannot open wordlist {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let lines = BufReader::new(file)
            .split(b'\n')
            .map_while(|line| line.ok())
            .map(|line| decode_line(&line));

        Ok(Box::new(lines))
    }
}

/// Decode one wordlist line, skipping invalid byte sequences
pub fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let mut line = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        line.push_str(chunk.valid());
    }
    line
}
