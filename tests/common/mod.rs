//! Scripted shell double shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use ctfkit::error::{CtfKitError, Result};
use ctfkit::remote::{CommandResult, Credential, RemoteShell, ShellHandle};
use ctfkit::AuthorizedTarget;

/// What the double does for a matching command
#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandResult),
    /// The transport fails
    Fail(String),
    /// The command never finishes
    Hang,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Output(CommandResult::new(0, stdout.as_bytes().to_vec(), Vec::new()))
    }

    pub fn exit(status: i32, stdout: &str, stderr: &str) -> Self {
        Reply::Output(CommandResult::new(
            status,
            stdout.as_bytes().to_vec(),
            stderr.as_bytes().to_vec(),
        ))
    }
}

/// One observed interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect { address: String, principal: String },
    Run(String),
    GetFile(String),
    PutFile(String, Vec<u8>),
    Abort(String),
    Close,
}

struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
struct State {
    rules: Vec<Rule>,
    calls: Vec<Call>,
    files: HashMap<String, Vec<u8>>,
    refuse: Option<String>,
    stall_transfers: bool,
}

/// `RemoteShell` that records every call and answers from a script.
///
/// A command gets the reply of the first rule whose needle it contains.
/// A rule with several replies hands them out in order and then repeats the
/// last one. Unmatched commands exit 0 with no output.
#[derive(Clone, Default)]
pub struct RecordingShell {
    state: Arc<Mutex<State>>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, needle: &str, reply: Reply) -> &Self {
        self.on_sequence(needle, vec![reply])
    }

    pub fn on_sequence(&self, needle: &str, replies: Vec<Reply>) -> &Self {
        self.state.lock().unwrap().rules.push(Rule {
            needle: needle.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn with_file(&self, path: &str, contents: &[u8]) -> &Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), contents.to_vec());
        self
    }

    /// File copies in either direction never finish
    pub fn stall_transfers(&self) -> &Self {
        self.state.lock().unwrap().stall_transfers = true;
        self
    }

    fn transfers_stalled(&self) -> bool {
        self.state.lock().unwrap().stall_transfers
    }

    pub fn refuse_connections(&self, reason: &str) -> &Self {
        self.state.lock().unwrap().refuse = Some(reason.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    pub fn count_commands(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn connects(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Connect { .. }))
            .count()
    }

    pub fn closes(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Close).count()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn reply_for(&self, command: &str) -> Reply {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Run(command.to_string()));
        for rule in state.rules.iter_mut() {
            if command.contains(&rule.needle) {
                return if rule.replies.len() > 1 {
                    rule.replies.pop_front().unwrap()
                } else {
                    rule.replies.front().cloned().unwrap()
                };
            }
        }
        Reply::ok("")
    }

    fn push(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl RemoteShell for RecordingShell {
    async fn connect(
        &self,
        target: &AuthorizedTarget,
        _port: u16,
        credential: &Credential,
        _timeout: Duration,
    ) -> Result<Box<dyn ShellHandle>> {
        self.push(Call::Connect {
            address: target.address().to_string(),
            principal: credential.principal.clone(),
        });
        if let Some(reason) = self.state.lock().unwrap().refuse.clone() {
            return Err(CtfKitError::connection(reason));
        }
        Ok(Box::new(RecordingHandle {
            shell: self.clone(),
        }))
    }
}

struct RecordingHandle {
    shell: RecordingShell,
}

#[async_trait]
impl ShellHandle for RecordingHandle {
    async fn run(&mut self, command: &str) -> Result<CommandResult> {
        match self.shell.reply_for(command) {
            Reply::Output(result) => Ok(result),
            Reply::Fail(reason) => Err(CtfKitError::connection(reason)),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn get_file(&mut self, remote_path: &str) -> Result<Vec<u8>> {
        self.shell.push(Call::GetFile(remote_path.to_string()));
        if self.shell.transfers_stalled() {
            std::future::pending::<()>().await;
        }
        self.shell
            .file(remote_path)
            .ok_or_else(|| CtfKitError::transfer(format!("cat: {}: No such file or directory", remote_path)))
    }

    async fn put_file(&mut self, remote_path: &str, contents: &[u8]) -> Result<()> {
        self.shell
            .push(Call::PutFile(remote_path.to_string(), contents.to_vec()));
        if self.shell.transfers_stalled() {
            std::future::pending::<()>().await;
        }
        self.shell
            .state
            .lock()
            .unwrap()
            .files
            .insert(remote_path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn abort(&mut self, command: &str) {
        self.shell.push(Call::Abort(command.to_string()));
    }

    async fn close(&mut self) {
        self.shell.push(Call::Close);
    }
}

/// Run a target through a throwaway guard
pub async fn authorized(address: &str) -> AuthorizedTarget {
    ctfkit::ScopeGuard::new(Arc::new(ctfkit::MemorySink::new()))
        .authorize(address)
        .await
        .into_result()
        .unwrap()
}

pub fn credential() -> Credential {
    Credential::password("kali", "kali")
}

/// Session manager over `shell` with a short command timeout
pub fn manager(
    shell: &RecordingShell,
    sink: Arc<ctfkit::MemorySink>,
    command_timeout: Duration,
) -> ctfkit::remote::SessionManager {
    let options = ctfkit::remote::SessionOptions {
        command_timeout,
        ..Default::default()
    };
    ctfkit::remote::SessionManager::new(Arc::new(shell.clone()), options, sink)
}
