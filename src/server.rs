//! MCP Server implementation
//!
//! Each tool call is one operation: scope check first, then a short-lived
//! session or a local tool run. Outcomes also go to the result sink.

use std::fmt::Write as _;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{CtfKitError, Result};
use crate::external::ToolRunner;
use crate::hash::{HashCracker, DEFAULT_HASH_FORMAT, DEFAULT_HASH_WORDLIST};
use crate::recon::{Recon, ScanReport};
use crate::remote::files::{self, COMMON_DIRECTORIES};
use crate::remote::forensics;
use crate::remote::{
    sanitize_command, CommandResult, Credential, Direction, RemoteShell, SearchMatches,
    SessionManager, SshShell,
};
use crate::scope::{Authorization, AuthorizedTarget, ScopeGuard};
use crate::search::{caesar, steg, SearchPolicy, Wordlist};
use crate::sink::{record_failure, FileResultSink, ResultSink};
use crate::tools::{self, *};

type ToolResult = std::result::Result<CallToolResult, McpError>;

/// Sink category for tool calls rejected before any work starts
pub const REQUEST_CATEGORY: &str = "request";

/// How long shutdown waits for cancelled calls to finish their cleanup
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Number of tool calls still running
#[derive(Clone)]
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self(Arc::new(sender))
    }

    fn enter(&self) -> CallGuard {
        self.0.send_modify(|n| *n += 1);
        CallGuard(self.clone())
    }

    fn count(&self) -> usize {
        *self.0.borrow()
    }

    /// Wait until no call is running, or `grace` elapses
    async fn drained(&self, grace: Duration) -> bool {
        let mut receiver = self.0.subscribe();
        let drained = tokio::time::timeout(grace, receiver.wait_for(|n| *n == 0))
            .await
            .is_ok();
        drained
    }
}

struct CallGuard(InFlight);

impl Drop for CallGuard {
    fn drop(&mut self) {
        (self.0).0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Cancellation for one tool call, tripped by the client or by shutdown
struct CallScope {
    token: CancelToken,
    watcher: JoinHandle<()>,
    _running: CallGuard,
}

impl Drop for CallScope {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// ctfkit MCP Server
#[derive(Clone)]
pub struct CtfKitServer {
    config: Arc<Config>,
    credential: Arc<Credential>,
    sessions: SessionManager,
    guard: ScopeGuard,
    runner: ToolRunner,
    recon: Recon,
    sink: Arc<dyn ResultSink>,
    shutdown: CancelToken,
    in_flight: InFlight,
}

impl CtfKitServer {
    /// Create the server with the SSH backend and the file result sink.
    ///
    /// No connection is made until a tool needs one.
    pub async fn new(config: Config) -> Result<Self> {
        let credential = config.load_credential().await?;
        let sink: Arc<dyn ResultSink> =
            Arc::new(FileResultSink::open(&config.log_dir, &config.output_dir).await?);
        let shell: Arc<dyn RemoteShell> = Arc::new(SshShell::default());
        Ok(Self::with_parts(Arc::new(config), credential, shell, sink))
    }

    /// Assemble the server from explicit parts
    pub fn with_parts(
        config: Arc<Config>,
        credential: Credential,
        shell: Arc<dyn RemoteShell>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let sessions = SessionManager::new(shell, config.session_options(), sink.clone());
        let guard = ScopeGuard::new(sink.clone());
        let runner = ToolRunner::new(sink.clone());
        let recon = Recon::new(guard.clone(), runner.clone(), sink.clone());

        Self {
            config,
            credential: Arc::new(credential),
            sessions,
            guard,
            runner,
            recon,
            sink,
            shutdown: CancelToken::new(),
            in_flight: InFlight::new(),
        }
    }

    /// Cancel everything in flight and make the result log durable.
    ///
    /// Waits up to `grace` for cancelled calls to finish, so privilege
    /// windows they hold are restored before the process exits.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down ctfkit server...");
        self.shutdown.cancel();
        if !self.in_flight.drained(grace).await {
            warn!(
                "{} tool calls still running after {}s",
                self.in_flight.count(),
                grace.as_secs()
            );
        }
        if let Err(e) = self.sink.flush().await {
            error!("Failed to flush result log: {}", e);
        }
    }

    fn call_scope<F>(&self, client_gone: F) -> CallScope
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancelToken::new();
        let linked = token.clone();
        let shutdown = self.shutdown.clone();

        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = client_gone => {}
                _ = shutdown.cancelled() => {}
            }
            linked.cancel();
        });

        CallScope {
            token,
            watcher,
            _running: self.in_flight.enter(),
        }
    }

    /// Deserialize tool arguments, recording malformed ones
    async fn parse<T: DeserializeOwned>(&self, args: JsonObject) -> Result<T> {
        match tools::parse_params(args) {
            Ok(params) => Ok(params),
            Err(e) => Err(self.reject(e).await),
        }
    }

    async fn reject(&self, err: CtfKitError) -> CtfKitError {
        record_failure(self.sink.as_ref(), REQUEST_CATEGORY, err).await
    }

    async fn authorize(&self, target: &str) -> Result<AuthorizedTarget> {
        self.guard.authorize(target).await.into_result()
    }

    async fn scope_check(&self, params: ScopeCheckParams) -> Result<String> {
        match self.guard.authorize(&params.target).await {
            Authorization::Authorized(target) => Ok(format!(
                "Authorized: {} ({:?})",
                target,
                target.family()
            )),
            rejected => rejected.into_result().map(|_| String::new()),
        }
    }

    async fn exec(&self, params: ExecParams, cancel: CancelToken) -> Result<String> {
        let command = match sanitize_command(&params.command, self.config.max_chars) {
            Ok(command) => command,
            Err(e) => return Err(self.reject(e).await),
        };
        let target = self.authorize(&params.target).await?;

        let output = self
            .sessions
            .with_session(&target, &self.credential, cancel, move |session| {
                Box::pin(async move { session.exec(&command).await })
            })
            .await?;

        Ok(format_command_result(&output))
    }

    async fn list_dirs(&self, params: ListDirsParams, cancel: CancelToken) -> Result<String> {
        let directories = params.directories.filter(|d| !d.is_empty()).unwrap_or_else(|| {
            COMMON_DIRECTORIES.iter().map(|d| d.to_string()).collect()
        });
        let target = self.authorize(&params.target).await?;

        let listings = self
            .sessions
            .with_session(&target, &self.credential, cancel, move |session| {
                Box::pin(async move { files::list_directories(session, &directories).await })
            })
            .await?;

        let mut out = String::new();
        for listing in listings {
            let _ = writeln!(out, "== {} ==", listing.directory);
            for entry in listing.entries {
                let _ = writeln!(out, "{}", entry);
            }
            out.push('\n');
        }
        Ok(out)
    }

    async fn read_file(&self, params: ReadFileParams, cancel: CancelToken) -> Result<String> {
        let target = self.authorize(&params.target).await?;
        let path = params.path;

        if params.protected || files::is_protected(&path) {
            let result = self
                .sessions
                .with_session(&target, &self.credential, cancel, move |session| {
                    Box::pin(async move { files::read_protected_file(session, &path).await })
                })
                .await?;

            // The contents are still returned when only the restore failed
            return match result.restore_error {
                Some(CtfKitError::PrivilegeRestoreFailure {
                    resource,
                    expected_mode,
                    detail,
                }) => {
                    let contents = match &result.action {
                        Ok(output) => format_command_result(output),
                        Err(e) => format!("read failed: {}", e),
                    };
                    Err(CtfKitError::PrivilegeRestoreFailure {
                        resource,
                        expected_mode,
                        detail: format!("{}\n\n{}", detail, contents),
                    })
                }
                Some(other) => Err(other),
                None => result.action.map(|output| format_command_result(&output)),
            };
        }

        let output = self
            .sessions
            .with_session(&target, &self.credential, cancel, move |session| {
                Box::pin(async move { files::read_file(session, &path).await })
            })
            .await?;
        Ok(format_command_result(&output))
    }

    async fn search_file(&self, params: SearchFileParams, cancel: CancelToken) -> Result<String> {
        let target = self.authorize(&params.target).await?;
        let SearchFileParams { path, keyword, .. } = params;

        let matches = self
            .sessions
            .with_session(&target, &self.credential, cancel, move |session| {
                Box::pin(async move { files::search_file(session, &path, &keyword).await })
            })
            .await?;

        Ok(format_matches(matches))
    }

    async fn transfer(
        &self,
        params: TransferParams,
        direction: Direction,
        cancel: CancelToken,
    ) -> Result<String> {
        let target = self.authorize(&params.target).await?;
        let TransferParams {
            remote_path,
            local_path,
            ..
        } = params;
        let local = PathBuf::from(local_path);
        let shown = match direction {
            Direction::Download => format!("{} -> {}", remote_path, local.display()),
            Direction::Upload => format!("{} -> {}", local.display(), remote_path),
        };

        self.sessions
            .with_session(&target, &self.credential, cancel, move |session| {
                Box::pin(async move { session.transfer(&remote_path, &local, direction).await })
            })
            .await?;

        Ok(format!("Transfer complete: {}", shown))
    }

    async fn caesar(&self, params: CaesarParams, cancel: CancelToken) -> Result<String> {
        let report = caesar::brute_force(&params.ciphertext, self.sink.clone(), cancel).await?;
        Ok(format!(
            "{}\nSaved to {}",
            report.render(),
            report.artifact.display()
        ))
    }

    async fn steg_check(&self, params: StegCheckParams, cancel: CancelToken) -> Result<String> {
        let report = steg::check_hidden_data(
            &self.runner,
            self.sink.as_ref(),
            Path::new(&params.image),
            self.config.command_timeout(),
            &cancel,
        )
        .await?;

        let verdict = if report.hidden_data {
            "Hidden data detected"
        } else {
            "No hidden data found"
        };
        Ok(format!("{}\n\n{}", verdict, report.output.trim()))
    }

    async fn steg_crack(&self, params: StegCrackParams, cancel: CancelToken) -> Result<String> {
        let policy = SearchPolicy::first_match()
            .with_attempt_timeout(self.config.attempt_timeout())
            .persist_attempts(self.config.persist_attempts);

        let report = steg::crack(
            &self.runner,
            self.sink.clone(),
            cancel,
            Path::new(&params.image),
            &Wordlist::new(&params.wordlist),
            &self.config.output_dir,
            self.config.attempt_timeout(),
            policy,
        )
        .await?;

        Ok(match (&report.passphrase, &report.extracted_to) {
            (Some(passphrase), Some(path)) => format!(
                "Passphrase found after {} attempts: {}\nExtracted data: {}",
                report.attempts,
                passphrase,
                path.display()
            ),
            _ => format!(
                "No passphrase found after {} attempts{}",
                report.attempts,
                report
                    .last_error
                    .as_deref()
                    .map(|e| format!(" (last error: {})", e))
                    .unwrap_or_default()
            ),
        })
    }

    async fn nmap(&self, params: NmapParams, cancel: CancelToken) -> Result<String> {
        let report = self
            .recon
            .nmap(&params.target, self.config.command_timeout(), &cancel)
            .await?;
        Ok(format_scan(&report))
    }

    async fn gobuster(&self, params: GobusterParams, cancel: CancelToken) -> Result<String> {
        let report = self
            .recon
            .gobuster(
                &params.url,
                Path::new(&params.wordlist),
                self.config.command_timeout(),
                &cancel,
            )
            .await?;
        Ok(format_scan(&report))
    }

    async fn crack_hash(&self, params: CrackHashParams, cancel: CancelToken) -> Result<String> {
        let wordlist = params
            .wordlist
            .unwrap_or_else(|| DEFAULT_HASH_WORDLIST.to_string());
        let format = params
            .format
            .unwrap_or_else(|| DEFAULT_HASH_FORMAT.to_string());

        let cracker = HashCracker::new(
            &self.runner,
            &self.config.output_dir,
            self.config.command_timeout(),
        );
        let report = cracker
            .crack(
                self.sink.clone(),
                &params.hash,
                Path::new(&wordlist),
                &format,
                &cancel,
            )
            .await?;

        let verdict = match &report.password {
            Some(password) => format!("Cracked: {}", password),
            None => "No password cracked".to_string(),
        };
        Ok(format!(
            "{}
Saved to {}",
            verdict,
            report.artifact.display()
        ))
    }

    async fn list_dumps(&self, params: ListDumpsParams, cancel: CancelToken) -> Result<String> {
        let target = self.authorize(&params.target).await?;

        let dumps = self
            .sessions
            .with_session(&target, &self.credential, cancel, |session| {
                Box::pin(async move { forensics::list_dumps(session).await })
            })
            .await?;

        if dumps.is_empty() {
            return Ok(format!(
                "No memory dump files found matching {}",
                forensics::DUMP_GLOB
            ));
        }
        Ok(dumps.join("\n"))
    }

    async fn search_dump(&self, params: SearchDumpParams, cancel: CancelToken) -> Result<String> {
        let target = self.authorize(&params.target).await?;
        let SearchDumpParams { path, keyword, .. } = params;

        let matches = self
            .sessions
            .with_session(&target, &self.credential, cancel, move |session| {
                Box::pin(async move { forensics::search_dump(session, &path, &keyword).await })
            })
            .await?;

        Ok(format_matches(matches))
    }

    async fn find_pcaps(&self, params: FindPcapsParams, cancel: CancelToken) -> Result<String> {
        let directories = params.directories.filter(|d| !d.is_empty()).unwrap_or_else(|| {
            COMMON_DIRECTORIES.iter().map(|d| d.to_string()).collect()
        });
        let target = self.authorize(&params.target).await?;

        let pcaps = self
            .sessions
            .with_session(&target, &self.credential, cancel, move |session| {
                Box::pin(async move { forensics::find_pcaps(session, &directories).await })
            })
            .await?;

        if pcaps.is_empty() {
            return Ok("No PCAP files found".to_string());
        }
        Ok(pcaps.join("\n"))
    }

    async fn view_pcap(&self, params: ViewPcapParams, cancel: CancelToken) -> Result<String> {
        let target = self.authorize(&params.target).await?;
        let path = params.path;
        let shown = path.clone();

        let packets = self
            .sessions
            .with_session(&target, &self.credential, cancel, move |session| {
                Box::pin(async move { forensics::view_pcap(session, &path).await })
            })
            .await?;

        if packets.is_empty() {
            return Ok(format!("No packets found in {}", shown));
        }
        Ok(packets.join("\n"))
    }

    /// Run one tool call the way the MCP handler does.
    ///
    /// The call is cancelled when `client_gone` resolves or the server shuts
    /// down, and [`CtfKitServer::shutdown`] waits for it to return.
    pub async fn call<F>(&self, name: &str, args: JsonObject, client_gone: F) -> Result<String>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let scope = self.call_scope(client_gone);
        self.invoke(name, args, scope.token.clone()).await
    }

    /// Run one tool by name and return its text output.
    ///
    /// Malformed or unknown calls fail with [`CtfKitError::InvalidParams`].
    pub async fn invoke(&self, name: &str, args: JsonObject, cancel: CancelToken) -> Result<String> {
        match name {
            "scope-check" => self.scope_check(self.parse(args).await?).await,
            "exec" => self.exec(self.parse(args).await?, cancel).await,
            "list-dirs" => self.list_dirs(self.parse(args).await?, cancel).await,
            "read-file" => self.read_file(self.parse(args).await?, cancel).await,
            "search-file" => self.search_file(self.parse(args).await?, cancel).await,
            "download" => {
                self.transfer(self.parse(args).await?, Direction::Download, cancel)
                    .await
            }
            "upload" => {
                self.transfer(self.parse(args).await?, Direction::Upload, cancel)
                    .await
            }
            "caesar" => self.caesar(self.parse(args).await?, cancel).await,
            "steg-check" => self.steg_check(self.parse(args).await?, cancel).await,
            "steg-crack" => self.steg_crack(self.parse(args).await?, cancel).await,
            "nmap" => self.nmap(self.parse(args).await?, cancel).await,
            "gobuster" => self.gobuster(self.parse(args).await?, cancel).await,
            "crack-hash" => self.crack_hash(self.parse(args).await?, cancel).await,
            "list-dumps" => self.list_dumps(self.parse(args).await?, cancel).await,
            "search-dump" => self.search_dump(self.parse(args).await?, cancel).await,
            "find-pcaps" => self.find_pcaps(self.parse(args).await?, cancel).await,
            "view-pcap" => self.view_pcap(self.parse(args).await?, cancel).await,
            _ => {
                let err = CtfKitError::invalid_params(format!("Unknown tool: {}", name));
                Err(self.reject(err).await)
            }
        }
    }
}

/// stdout, then stderr under a separator, then the exit status
fn format_command_result(output: &CommandResult) -> String {
    let mut text = output.stdout_text();
    let stderr = output.stderr_text();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push_str("\n--- stderr ---\n");
        }
        text.push_str(&stderr);
    }
    if !output.success() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        let _ = write!(text, "[exit status {}]", output.exit_status);
    }
    text
}

fn format_matches(matches: SearchMatches) -> String {
    match matches {
        SearchMatches::Found(lines) => lines.join("\n"),
        SearchMatches::NoMatches => "No matches found".to_string(),
        SearchMatches::Failed {
            exit_status,
            stderr,
        } => format!("Search exited with {}: {}", exit_status, stderr),
    }
}

fn format_scan(report: &ScanReport) -> String {
    format!(
        "{}\n[exit status {}, saved to {}]",
        report.output.combined_output().trim_end(),
        report.output.exit_status,
        report.artifact.display()
    )
}

impl ServerHandler for CtfKitServer {
    /// Return server information
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "ctfkit v{} - SSH as {} (port {}) and local CTF tooling, restricted to private lab ranges",
                env!("CARGO_PKG_VERSION"),
                self.config.user,
                self.config.port,
            )),
        }
    }

    /// List available tools
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        debug!("list_tools called");

        Ok(ListToolsResult {
            tools: tools::tool_definitions(),
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Call a tool
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> ToolResult {
        let tool_name: &str = request.name.as_ref();
        debug!("call_tool called: {:?}", tool_name);

        let args = request.arguments.unwrap_or_default();
        let client = context.ct.clone();

        match self
            .call(tool_name, args, async move { client.cancelled().await })
            .await
        {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(CtfKitError::InvalidParams(msg)) => Err(McpError::invalid_params(msg, None)),
            Err(e) => {
                error!("{} failed: {}", tool_name, e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Error: {}",
                    e
                ))]))
            }
        }
    }
}
