//! Passphrase recovery against a scripted steghide stand-in

use std::sync::Arc;
use std::time::Duration;

use ctfkit::search::steg::{crack_with, StegCracker, STEG_CATEGORY};
use ctfkit::search::{SearchPolicy, Wordlist};
use ctfkit::external::{Launcher, ToolRunner};
use ctfkit::{CancelToken, MemorySink, Severity};

// Called as: <script> extract -sf <image> -xf <out> -p <passphrase> -f
const FAKE_STEGHIDE: &str = r#"
[ "$7" = "gamma" ] || { echo "steghide: could not extract any data with that passphrase!" >&2; exit 1; }
printf 'flag{hidden_in_plain_sight}' > "$5"
"#;

#[tokio::test]
async fn test_crack_stops_at_first_passphrase_that_extracts() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("cover.jpg");
    std::fs::write(&image, b"jpeg bytes").unwrap();
    let script = dir.path().join("steghide.sh");
    std::fs::write(&script, FAKE_STEGHIDE).unwrap();
    let words = dir.path().join("words.txt");
    std::fs::write(&words, "alpha\nbeta\ngamma\ndelta\n").unwrap();
    let output = dir.path().join("extracted_data.txt");

    let sink = Arc::new(MemorySink::new());
    let runner = ToolRunner::new(sink.clone());
    let cancel = CancelToken::new();

    // sh reads the script, so it need not be executable
    let cracker = StegCracker::new(&runner, &image, &output, Duration::from_secs(10), cancel.clone())
        .with_launcher(Launcher::script("sh", &script));

    let report = crack_with(
        cracker,
        sink.clone(),
        cancel,
        &Wordlist::new(&words),
        SearchPolicy::first_match(),
    )
    .await
    .unwrap();

    assert!(report.found());
    assert_eq!(report.passphrase.as_deref(), Some("gamma"));
    assert_eq!(report.attempts, 3);
    assert_eq!(report.extracted_to.as_deref(), Some(output.as_path()));
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "flag{hidden_in_plain_sight}"
    );

    let artifacts = sink.artifacts().await;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].0, STEG_CATEGORY);
    assert!(artifacts[0].1.contains("Passphrase: gamma"));
    assert!(artifacts[0].1.contains("Attempts: 3"));

    // Wrong passphrases are not tool failures worth a record
    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].severity, Severity::Info);
    assert!(records[0].payload.contains("Found 'gamma'"));
}
