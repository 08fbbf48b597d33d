//! MCP tool catalogue
//!
//! Parameter types for every tool, their JSON schemas, and the [`Tool`]
//! definitions advertised by `list_tools`. Dispatch lives in `server.rs`.

use std::sync::Arc;

use rmcp::model::{JsonObject, Tool};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CtfKitError, Result};

/// Parameters for the scope-check tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ScopeCheckParams {
    /// Target IP address to check against the authorized ranges
    pub target: String,
}

/// Parameters for the exec tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ExecParams {
    /// Target IP address
    pub target: String,
    /// Shell command to execute on the target
    pub command: String,
}

/// Parameters for the list-dirs tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ListDirsParams {
    /// Target IP address
    pub target: String,
    /// Directories to list (defaults to /home, /root, /var/www and /etc)
    #[serde(default)]
    pub directories: Option<Vec<String>>,
}

/// Parameters for the read-file tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ReadFileParams {
    /// Target IP address
    pub target: String,
    /// Absolute path of the remote file
    pub path: String,
    /// Open the file up with sudo for the read and restore its mode afterwards
    #[serde(default)]
    pub protected: bool,
}

/// Parameters for the search-file tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchFileParams {
    /// Target IP address
    pub target: String,
    /// Remote file to search
    pub path: String,
    /// Case-insensitive keyword
    pub keyword: String,
}

/// Parameters for the download and upload tools
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct TransferParams {
    /// Target IP address
    pub target: String,
    /// Path on the target
    pub remote_path: String,
    /// Path on this machine
    pub local_path: String,
}

/// Parameters for the caesar tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CaesarParams {
    /// Letters and whitespace only
    pub ciphertext: String,
}

/// Parameters for the steg-check tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct StegCheckParams {
    /// Local path of the cover image
    pub image: String,
}

/// Parameters for the steg-crack tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct StegCrackParams {
    /// Local path of the cover image
    pub image: String,
    /// Passphrase wordlist, one candidate per line
    pub wordlist: String,
}

/// Parameters for the nmap tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct NmapParams {
    /// Target IP address
    pub target: String,
}

/// Parameters for the gobuster tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct GobusterParams {
    /// Base URL, e.g. http://10.10.10.5/
    pub url: String,
    /// Path wordlist
    pub wordlist: String,
}

/// Parameters for the crack-hash tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CrackHashParams {
    /// The hash to crack
    pub hash: String,
    /// Password wordlist (defaults to /usr/share/wordlists/rockyou.txt)
    #[serde(default)]
    pub wordlist: Option<String>,
    /// john format name (defaults to Raw-MD5)
    #[serde(default)]
    pub format: Option<String>,
}

/// Parameters for the list-dumps tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ListDumpsParams {
    /// Target IP address
    pub target: String,
}

/// Parameters for the search-dump tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchDumpParams {
    /// Target IP address
    pub target: String,
    /// Remote path of the memory dump
    pub path: String,
    /// Case-insensitive keyword
    pub keyword: String,
}

/// Parameters for the find-pcaps tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct FindPcapsParams {
    /// Target IP address
    pub target: String,
    /// Directories to search (defaults to /home, /root, /var/www and /etc)
    #[serde(default)]
    pub directories: Option<Vec<String>>,
}

/// Parameters for the view-pcap tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ViewPcapParams {
    /// Target IP address
    pub target: String,
    /// Remote path of the capture file
    pub path: String,
}

/// JSON schema of `T` as an MCP input schema
pub fn input_schema<T: JsonSchema>() -> Arc<JsonObject> {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(schema).unwrap_or_default();
    Arc::new(value.as_object().cloned().unwrap_or_default())
}

/// Deserialize tool arguments into `T`
pub fn parse_params<T: DeserializeOwned>(args: JsonObject) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(args))
        .map_err(|e| CtfKitError::invalid_params(e.to_string()))
}

fn tool<T: JsonSchema>(name: &'static str, description: &'static str) -> Tool {
    Tool::new(name, description, input_schema::<T>())
}

/// Every tool the server offers
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        tool::<ScopeCheckParams>(
            "scope-check",
            "Check whether a target IP address is inside the authorized lab ranges.",
        ),
        tool::<ExecParams>(
            "exec",
            "Open an SSH session to an authorized target, run one shell command and return its output and exit status.",
        ),
        tool::<ListDirsParams>(
            "list-dirs",
            "List directories on an authorized target with `ls -la`.",
        ),
        tool::<ReadFileParams>(
            "read-file",
            "Read a remote file. Protected files such as /etc/shadow are opened up with sudo for the read and their mode is restored afterwards.",
        ),
        tool::<SearchFileParams>(
            "search-file",
            "Case-insensitive keyword search in a remote file.",
        ),
        tool::<TransferParams>(
            "download",
            "Copy a file from an authorized target to this machine.",
        ),
        tool::<TransferParams>(
            "upload",
            "Copy a file from this machine to an authorized target.",
        ),
        tool::<CaesarParams>(
            "caesar",
            "Decrypt a Caesar ciphertext with every shift from 1 to 25.",
        ),
        tool::<StegCheckParams>(
            "steg-check",
            "Check whether an image carries steghide-embedded data.",
        ),
        tool::<StegCrackParams>(
            "steg-crack",
            "Brute-force a steghide passphrase from a wordlist and extract the hidden data.",
        ),
        tool::<NmapParams>(
            "nmap",
            "SYN scan an authorized target with nmap (-sS -vv -T4).",
        ),
        tool::<GobusterParams>(
            "gobuster",
            "Brute-force directories and files on an authorized web server with gobuster.",
        ),
        tool::<CrackHashParams>(
            "crack-hash",
            "Crack a password hash locally with John the Ripper and a wordlist.",
        ),
        tool::<ListDumpsParams>(
            "list-dumps",
            "List LiME memory dumps in /tmp on an authorized target.",
        ),
        tool::<SearchDumpParams>(
            "search-dump",
            "Case-insensitive keyword search over the printable strings of a remote memory dump.",
        ),
        tool::<FindPcapsParams>(
            "find-pcaps",
            "Find .pcap files under common directories on an authorized target.",
        ),
        tool::<ViewPcapParams>(
            "view-pcap",
            "Summarize the packets of a remote capture file with tshark.",
        ),
    ]
}
