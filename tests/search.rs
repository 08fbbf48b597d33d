//! Candidate searches over real wordlists with the file-backed sink

use std::io::Write;
use std::sync::Arc;

use ctfkit::error::Result;
use ctfkit::search::{CandidateSearch, SearchPolicy, Transform, Verifier, Wordlist};
use ctfkit::sink::LOG_FILE_NAME;
use ctfkit::{CancelToken, FileResultSink, ResultSink};

fn wordlist(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

#[tokio::test]
async fn test_exhausted_wordlist_logs_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(
        FileResultSink::open(&dir.path().join("logs"), &dir.path().join("outputs"))
            .await
            .unwrap(),
    );
    let words = wordlist(&["123456", "password", "qwerty", "letmein", "dragon"]);

    let search = CandidateSearch::new(sink.clone(), CancelToken::new(), "hash-crack");
    let mut apply = Transform(|word: &String| -> Result<usize> { Ok(word.len()) });
    let verify: &Verifier<usize> = &|len: &usize| *len > 100;

    let outcome = search
        .run(
            &Wordlist::new(words.path()),
            &mut apply,
            Some(verify),
            &SearchPolicy::first_match(),
        )
        .await
        .unwrap();
    sink.flush().await.unwrap();

    assert!(!outcome.found);
    assert_eq!(outcome.attempts_tried, 5);

    let log = std::fs::read_to_string(dir.path().join("logs").join(LOG_FILE_NAME)).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(" - WARN - hash-crack - "));
    // Candidates are not written unless every attempt is persisted
    assert!(!log.contains("letmein"));
}

#[tokio::test]
async fn test_persisted_attempts_are_logged_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(
        FileResultSink::open(&dir.path().join("logs"), &dir.path().join("outputs"))
            .await
            .unwrap(),
    );
    let words = wordlist(&["alpha", "bravo", "charlie", "delta"]);

    let search = CandidateSearch::new(sink.clone(), CancelToken::new(), "hash-crack");
    let mut apply = Transform(|word: &String| -> Result<String> { Ok(word.to_uppercase()) });
    let verify: &Verifier<String> = &|out: &String| out == "CHARLIE";

    let outcome = search
        .run(
            &Wordlist::new(words.path()),
            &mut apply,
            Some(verify),
            &SearchPolicy::first_match().persist_attempts(true),
        )
        .await
        .unwrap();
    sink.flush().await.unwrap();

    assert_eq!(outcome.winning_candidate.as_deref(), Some("charlie"));
    assert_eq!(outcome.winning_output.as_deref(), Some("CHARLIE"));
    assert_eq!(outcome.attempts_tried, 3);

    let log = std::fs::read_to_string(dir.path().join("logs").join(LOG_FILE_NAME)).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].ends_with("Attempt 1: alpha -> rejected"));
    assert!(lines[1].ends_with("Attempt 2: bravo -> rejected"));
    assert!(lines[2].ends_with("Attempt 3: charlie -> verified"));
    assert!(lines[3].contains("Found 'charlie'"));
}
