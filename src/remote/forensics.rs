//! Memory dumps and packet captures on a connected target
//!
//! LiME images are looked for in `/tmp`, captures under the common
//! directories. Like the file helpers, every function works on an open
//! session and leaves its lifetime to the caller.

use tracing::info;

use super::files::{checked_path, SearchMatches};
use super::sanitize::quote;
use super::session::RemoteSession;
use crate::error::{CtfKitError, Result};
use crate::sink::{note, record_failure, Severity};

/// Sink and artifact category of memory dump work
pub const DUMP_CATEGORY: &str = "memory-dump";

/// Sink and artifact category of packet capture work
pub const PCAP_CATEGORY: &str = "pcap";

/// Where memory dumps are looked for
pub const DUMP_GLOB: &str = "/tmp/*.lime";

/// `ls -lh` of every LiME image in `/tmp`; no match is an empty list
pub async fn list_dumps(session: &mut RemoteSession) -> Result<Vec<String>> {
    let output = session
        .exec(&format!("ls -lh {} 2>/dev/null", DUMP_GLOB))
        .await?;
    let dumps: Vec<String> = output
        .stdout_text()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    let sink = session.sink().clone();
    if dumps.is_empty() {
        note(
            sink.as_ref(),
            Severity::Warn,
            DUMP_CATEGORY,
            format!("No memory dump files found matching {}", DUMP_GLOB),
        )
        .await;
    } else {
        info!("{} memory dumps on {}", dumps.len(), session.target());
    }
    Ok(dumps)
}

/// Case-insensitive keyword search over the printable strings of a dump.
///
/// Matches are saved as an artifact. grep exiting 1 with something on
/// stderr means `strings` itself failed, which is not "no matches".
pub async fn search_dump(
    session: &mut RemoteSession,
    path: &str,
    keyword: &str,
) -> Result<SearchMatches> {
    let path = checked_path(session, path).await?;
    if keyword.is_empty() {
        let err = CtfKitError::invalid_params("Keyword cannot be empty");
        return Err(session.reject(err).await);
    }

    let command = format!(
        "strings -- {} | grep -i -F -- {}",
        quote(&path),
        quote(keyword)
    );
    let output = session.exec(&command).await?;
    let stderr = output.stderr_text().trim().to_string();

    let matches = match output.exit_status {
        0 => SearchMatches::Found(output.stdout_text().lines().map(str::to_string).collect()),
        1 if stderr.is_empty() => SearchMatches::NoMatches,
        exit_status => SearchMatches::Failed {
            exit_status,
            stderr,
        },
    };

    let sink = session.sink().clone();
    match &matches {
        SearchMatches::Found(lines) => {
            let contents = format!(
                "--- Search Results for '{}' in {} ---\n{}\n",
                keyword,
                path,
                lines.join("\n")
            );
            if let Err(e) = sink.save_artifact(DUMP_CATEGORY, &contents).await {
                return Err(record_failure(sink.as_ref(), DUMP_CATEGORY, e).await);
            }
            note(
                sink.as_ref(),
                Severity::Info,
                DUMP_CATEGORY,
                format!("{} lines matching '{}' in {}", lines.len(), keyword, path),
            )
            .await;
        }
        SearchMatches::NoMatches => {
            note(
                sink.as_ref(),
                Severity::Info,
                DUMP_CATEGORY,
                format!("No results for '{}' in {}", keyword, path),
            )
            .await;
        }
        SearchMatches::Failed { exit_status, stderr } => {
            note(
                sink.as_ref(),
                Severity::Error,
                DUMP_CATEGORY,
                format!("Search of {} exited with {}: {}", path, exit_status, stderr),
            )
            .await;
        }
    }

    Ok(matches)
}

/// Every `*.pcap` below `directories`, in directory order.
///
/// Unreadable subtrees are skipped; whatever `find` printed still counts.
pub async fn find_pcaps(session: &mut RemoteSession, directories: &[String]) -> Result<Vec<String>> {
    let mut found = Vec::new();

    for directory in directories {
        let directory = checked_path(session, directory).await?;
        let command = format!("find {} -name '*.pcap' 2>/dev/null", quote(&directory));
        let output = session.exec(&command).await?;
        found.extend(
            output
                .stdout_text()
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string),
        );
    }

    let sink = session.sink().clone();
    let payload = if found.is_empty() {
        format!("No capture files under {}", directories.join(", "))
    } else {
        format!("{} capture files: {}", found.len(), found.join(", "))
    };
    note(sink.as_ref(), Severity::Info, PCAP_CATEGORY, payload).await;

    Ok(found)
}

/// Packet summary of a remote capture via `tshark -r`, one line per packet.
///
/// A non-zero exit is a tool error carrying tshark's stderr.
pub async fn view_pcap(session: &mut RemoteSession, path: &str) -> Result<Vec<String>> {
    let path = checked_path(session, path).await?;

    let output = session.exec(&format!("tshark -r {}", quote(&path))).await?;
    let sink = session.sink().clone();
    if !output.success() {
        let err = CtfKitError::tool(format!(
            "Error reading {}: {}",
            path,
            output.stderr_text().trim()
        ));
        return Err(record_failure(sink.as_ref(), PCAP_CATEGORY, err).await);
    }

    let packets: Vec<String> = output
        .stdout_text()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();
    note(
        sink.as_ref(),
        Severity::Info,
        PCAP_CATEGORY,
        format!("{} packets read from {}", packets.len(), path),
    )
    .await;

    Ok(packets)
}
