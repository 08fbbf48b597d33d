//! Memory dump and packet capture helpers

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{authorized, credential, manager, RecordingShell, Reply};
use ctfkit::remote::forensics::{
    find_pcaps, list_dumps, search_dump, view_pcap, DUMP_CATEGORY, PCAP_CATEGORY,
};
use ctfkit::remote::{RemoteSession, SearchMatches};
use ctfkit::{CancelToken, CtfKitError, MemorySink, Severity};

async fn open(shell: &RecordingShell, sink: Arc<MemorySink>) -> RemoteSession {
    let target = authorized("172.16.5.9").await;
    manager(shell, sink, Duration::from_secs(5))
        .open(&target, &credential(), CancelToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_list_dumps_reads_tmp_lime_images() {
    let shell = RecordingShell::new();
    shell.on(
        "ls -lh /tmp/*.lime",
        Reply::ok("-rw-r--r-- 1 root root 512M Jan 1 00:00 /tmp/host.lime\n"),
    );
    let sink = Arc::new(MemorySink::new());
    let mut session = open(&shell, sink.clone()).await;

    let dumps = list_dumps(&mut session).await.unwrap();
    session.close().await;

    assert_eq!(dumps.len(), 1);
    assert!(dumps[0].ends_with("/tmp/host.lime"));
    assert_eq!(shell.commands(), vec!["ls -lh /tmp/*.lime 2>/dev/null".to_string()]);
    assert!(sink.records_in(DUMP_CATEGORY).await.is_empty());
}

#[tokio::test]
async fn test_no_dumps_is_an_empty_list_with_a_warning() {
    let shell = RecordingShell::new();
    shell.on("ls -lh", Reply::exit(2, "", ""));
    let sink = Arc::new(MemorySink::new());
    let mut session = open(&shell, sink.clone()).await;

    let dumps = list_dumps(&mut session).await.unwrap();
    session.close().await;

    assert!(dumps.is_empty());
    let records = sink.records_in(DUMP_CATEGORY).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].severity, Severity::Warn);
}

#[tokio::test]
async fn test_search_dump_saves_matches() {
    let shell = RecordingShell::new();
    shell.on("strings", Reply::ok("password=hunter2\nPASSWORD_FILE=/etc/pw\n"));
    let sink = Arc::new(MemorySink::new());
    let mut session = open(&shell, sink.clone()).await;

    let matches = search_dump(&mut session, "/tmp/host.lime", "password")
        .await
        .unwrap();
    session.close().await;

    assert_eq!(
        matches,
        SearchMatches::Found(vec![
            "password=hunter2".to_string(),
            "PASSWORD_FILE=/etc/pw".to_string()
        ])
    );
    assert_eq!(
        shell.commands()[0],
        "strings -- '/tmp/host.lime' | grep -i -F -- 'password'"
    );

    let artifacts = sink.artifacts().await;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].0, DUMP_CATEGORY);
    assert!(artifacts[0]
        .1
        .starts_with("--- Search Results for 'password' in /tmp/host.lime ---"));
}

#[tokio::test]
async fn test_search_dump_tells_missing_dump_from_no_matches() {
    let shell = RecordingShell::new();
    shell.on_sequence(
        "strings",
        vec![
            Reply::exit(1, "", ""),
            Reply::exit(1, "", "strings: '/tmp/gone.lime': No such file\n"),
        ],
    );
    let sink = Arc::new(MemorySink::new());
    let mut session = open(&shell, sink.clone()).await;

    let quiet = search_dump(&mut session, "/tmp/host.lime", "flag").await.unwrap();
    let missing = search_dump(&mut session, "/tmp/gone.lime", "flag").await.unwrap();
    session.close().await;

    assert_eq!(quiet, SearchMatches::NoMatches);
    assert!(matches!(
        missing,
        SearchMatches::Failed { exit_status: 1, ref stderr } if stderr.contains("No such file")
    ));
    assert!(sink.artifacts().await.is_empty());

    let records = sink.records_in(DUMP_CATEGORY).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].severity, Severity::Error);
}

#[tokio::test]
async fn test_search_dump_rejects_empty_keyword() {
    let shell = RecordingShell::new();
    let sink = Arc::new(MemorySink::new());
    let mut session = open(&shell, sink.clone()).await;

    let err = search_dump(&mut session, "/tmp/host.lime", "").await.unwrap_err();
    session.close().await;

    assert!(matches!(err, CtfKitError::InvalidParams(_)));
    assert!(shell.commands().is_empty());
}

#[tokio::test]
async fn test_find_pcaps_collects_every_directory() {
    let shell = RecordingShell::new();
    shell.on("find '/home'", Reply::ok("/home/ctf/capture.pcap\n"));
    shell.on(
        "find '/root'",
        Reply::exit(1, "/root/net/dump.pcap\n", ""),
    );
    let sink = Arc::new(MemorySink::new());
    let mut session = open(&shell, sink.clone()).await;

    let dirs = vec!["/home".to_string(), "/root".to_string(), "/etc".to_string()];
    let pcaps = find_pcaps(&mut session, &dirs).await.unwrap();
    session.close().await;

    assert_eq!(pcaps, vec!["/home/ctf/capture.pcap", "/root/net/dump.pcap"]);
    assert_eq!(shell.commands().len(), 3);
    assert_eq!(shell.commands()[2], "find '/etc' -name '*.pcap' 2>/dev/null");
    assert_eq!(shell.connects(), 1);

    let records = sink.records_in(PCAP_CATEGORY).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].payload.starts_with("2 capture files"));
}

#[tokio::test]
async fn test_view_pcap_lists_packets_and_fails_loudly() {
    let shell = RecordingShell::new();
    shell.on(
        "tshark -r '/home/ctf/capture.pcap'",
        Reply::ok("    1   0.000000 10.0.0.1 → 10.0.0.2 TCP 74 ...\n    2   0.000120 10.0.0.2 → 10.0.0.1 TCP 74 ...\n"),
    );
    shell.on(
        "tshark -r '/home/ctf/broken.pcap'",
        Reply::exit(2, "", "tshark: The file appears to be damaged or corrupt.\n"),
    );
    let sink = Arc::new(MemorySink::new());
    let mut session = open(&shell, sink.clone()).await;

    let packets = view_pcap(&mut session, "/home/ctf/capture.pcap").await.unwrap();
    let err = view_pcap(&mut session, "/home/ctf/broken.pcap").await.unwrap_err();
    session.close().await;

    assert_eq!(packets.len(), 2);
    assert!(matches!(err, CtfKitError::Tool(_)));
    assert!(err.to_string().contains("damaged or corrupt"));

    let records = sink.records_in(PCAP_CATEGORY).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].severity, Severity::Info);
    assert_eq!(records[1].severity, Severity::Error);
}
