//! Rotation-cipher recovery
//!
//! Every shift of 1..=25 is applied and every candidate plaintext is kept;
//! picking the readable one is left to the operator.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use super::{CandidateSearch, SearchPolicy, ShiftRange, Transform};
use crate::cancel::CancelToken;
use crate::error::{CtfKitError, Result};
use crate::sink::{record_failure, ResultSink};

/// Sink and artifact category
pub const CAESAR_CATEGORY: &str = "caesar";

/// Shift ASCII letters back by `shift`, keeping case. Other characters pass through.
pub fn rotate(text: &str, shift: u8) -> String {
    let shift = shift % 26;
    text.chars()
        .map(|c| {
            let base = if c.is_ascii_uppercase() {
                b'A'
            } else if c.is_ascii_lowercase() {
                b'a'
            } else {
                return c;
            };
            let offset = (c as u8 - base + 26 - shift) % 26;
            (base + offset) as char
        })
        .collect()
}

/// Reject ciphertext that is blank or holds anything but letters and whitespace
pub fn validate_ciphertext(ciphertext: &str) -> Result<()> {
    if ciphertext.trim().is_empty() {
        return Err(CtfKitError::invalid_params(
            "Ciphertext cannot be empty",
        ));
    }
    if let Some(bad) = ciphertext
        .chars()
        .find(|c| !(c.is_ascii_alphabetic() || c.is_whitespace()))
    {
        return Err(CtfKitError::invalid_params(format!(
            "Ciphertext may only contain letters and whitespace (found {:?})",
            bad
        )));
    }
    Ok(())
}

/// Every candidate plaintext, in shift order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaesarReport {
    pub shifts: Vec<(u8, String)>,
    /// Where the report was persisted
    pub artifact: PathBuf,
}

impl CaesarReport {
    pub fn render(&self) -> String {
        render_shifts(&self.shifts)
    }
}

fn render_shifts(shifts: &[(u8, String)]) -> String {
    let mut out = String::new();
    for (shift, text) in shifts {
        let _ = writeln!(out, "Shift {}: {}", shift, text);
    }
    out
}

/// Enumerate all shifts of `ciphertext` and save them as one artifact
pub async fn brute_force(
    ciphertext: &str,
    sink: Arc<dyn ResultSink>,
    cancel: CancelToken,
) -> Result<CaesarReport> {
    if let Err(e) = validate_ciphertext(ciphertext) {
        return Err(record_failure(sink.as_ref(), CAESAR_CATEGORY, e).await);
    }

    let search = CandidateSearch::new(sink.clone(), cancel, CAESAR_CATEGORY);
    let mut apply = Transform(|shift: &u8| Ok(rotate(ciphertext, *shift)));

    let outcome = search
        .run(
            &ShiftRange::default(),
            &mut apply,
            None,
            &SearchPolicy::exhaustive_enumerate(),
        )
        .await?;

    let shifts: Vec<(u8, String)> = outcome
        .enumerated
        .into_iter()
        .filter_map(|attempt| attempt.result.ok().map(|text| (attempt.candidate, text)))
        .collect();

    let artifact = match sink.save_artifact(CAESAR_CATEGORY, &render_shifts(&shifts)).await {
        Ok(path) => path,
        Err(e) => return Err(record_failure(sink.as_ref(), CAESAR_CATEGORY, e).await),
    };
    info!("Caesar shifts saved to {}", artifact.display());

    Ok(CaesarReport { shifts, artifact })
}
