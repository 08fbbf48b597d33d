//! File exploration helpers

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{authorized, credential, manager, RecordingShell, Reply};
use ctfkit::remote::files::{list_directories, read_file, search_file, COMMON_DIRECTORIES};
use ctfkit::remote::session::SESSION_CATEGORY;
use ctfkit::remote::{RemoteSession, SearchMatches};
use ctfkit::{CancelToken, CtfKitError, MemorySink, Severity};

async fn open(shell: &RecordingShell) -> RemoteSession {
    let target = authorized("10.10.10.20").await;
    manager(shell, Arc::new(MemorySink::new()), Duration::from_secs(5))
        .open(&target, &credential(), CancelToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_listing_reports_unreadable_directory_inline() {
    let shell = RecordingShell::new();
    shell.on("'/home'", Reply::ok("total 4\ndrwxr-xr-x 3 ctf ctf 4096 Jan 1 00:00 ctf\n"));
    shell.on(
        "'/root'",
        Reply::exit(2, "", "ls: cannot open directory '/root': Permission denied\n"),
    );
    let mut session = open(&shell).await;

    let directories: Vec<String> = COMMON_DIRECTORIES.iter().map(|d| d.to_string()).collect();
    let listings = list_directories(&mut session, &directories).await.unwrap();
    session.close().await;

    assert_eq!(listings.len(), 4);
    assert!(listings[0].success());
    assert_eq!(listings[0].entries.len(), 2);
    assert!(!listings[1].success());
    assert!(listings[1].entries[0].starts_with("Error listing directory"));
    assert_eq!(shell.connects(), 1);
}

#[tokio::test]
async fn test_search_exit_codes() {
    let shell = RecordingShell::new();
    shell.on("'flag' '/var/www/html/index.php'", Reply::ok("<!-- FLAG{x} -->\n"));
    shell.on("'flag' '/etc/hosts'", Reply::exit(1, "", ""));
    shell.on("'flag' '/root/secret'", Reply::exit(2, "", "grep: /root/secret: Permission denied\n"));
    let mut session = open(&shell).await;

    let found = search_file(&mut session, "/var/www/html/index.php", "flag").await.unwrap();
    assert_eq!(found, SearchMatches::Found(vec!["<!-- FLAG{x} -->".to_string()]));

    let none = search_file(&mut session, "/etc/hosts", "flag").await.unwrap();
    assert_eq!(none, SearchMatches::NoMatches);

    let failed = search_file(&mut session, "/root/secret", "flag").await.unwrap();
    assert!(matches!(failed, SearchMatches::Failed { exit_status: 2, .. }));

    assert!(shell.commands()[0].starts_with("grep -i"));
    session.close().await;
}

#[tokio::test]
async fn test_paths_and_keywords_are_quoted() {
    let shell = RecordingShell::new();
    let mut session = open(&shell).await;

    read_file(&mut session, "/tmp/it's here").await.unwrap();
    session.close().await;

    assert_eq!(shell.commands()[0], "cat -- '/tmp/it'\"'\"'s here'");
}

#[tokio::test]
async fn test_bad_inputs_rejected_before_running() {
    let shell = RecordingShell::new();
    let sink = Arc::new(MemorySink::new());
    let target = authorized("10.10.10.20").await;
    let mut session = manager(&shell, sink.clone(), Duration::from_secs(5))
        .open(&target, &credential(), CancelToken::new())
        .await
        .unwrap();

    let err = read_file(&mut session, "").await.unwrap_err();
    assert!(matches!(err, CtfKitError::InvalidParams(_)));

    let err = search_file(&mut session, "/etc/passwd", "").await.unwrap_err();
    assert!(matches!(err, CtfKitError::InvalidParams(_)));

    session.close().await;
    assert!(shell.commands().is_empty());

    let records = sink.records_in(SESSION_CATEGORY).await;
    let rejected: Vec<_> = records
        .iter()
        .filter(|r| r.severity == Severity::Error)
        .collect();
    assert_eq!(rejected.len(), 2);
    assert!(rejected[0].payload.contains("Path cannot be empty"));
    assert!(rejected[1].payload.contains("Keyword cannot be empty"));
}
