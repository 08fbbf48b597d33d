//! ctfkit - A Model Context Protocol server for CTF lab work
//!
//! Orchestrates SSH sessions, file exploration, privilege windows and
//! brute-force searches against lab targets. Every network target must sit
//! inside a private or loopback IPv4 range; everything else is refused before
//! a connection or process is started.
//!
//! # MCP Tools
//!
//! - `scope-check` - Check a target against the authorized ranges
//! - `exec` - Run one shell command on a target
//! - `list-dirs` / `read-file` / `search-file` - File exploration
//! - `download` / `upload` - File transfer over SSH
//! - `caesar` - Enumerate every Caesar shift of a ciphertext
//! - `steg-check` / `steg-crack` - steghide detection and passphrase search
//! - `nmap` / `gobuster` - Scope-guarded reconnaissance
//! - `crack-hash` - John the Ripper wordlist attack on one hash
//! - `list-dumps` / `search-dump` - Memory dumps on a target
//! - `find-pcaps` / `view-pcap` - Packet captures on a target
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ctfkit --user=kali --password=secret --sudo-password=secret
//! ```
//!
//! # Example Usage (MCP Inspector)
//!
//! ```bash
//! npx @modelcontextprotocol/inspector ./target/release/ctfkit -- \
//!   --user=root --key=~/.ssh/id_ed25519
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod external;
pub mod hash;
pub mod recon;
pub mod remote;
pub mod scope;
pub mod search;
pub mod server;
pub mod sink;
pub mod tools;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use config::{Args, Config};
pub use error::{CtfKitError, Result};
pub use scope::{Authorization, AuthorizedTarget, ScopeGuard};
pub use server::CtfKitServer;
pub use sink::{FileResultSink, MemorySink, ResultRecord, ResultSink, Severity};
