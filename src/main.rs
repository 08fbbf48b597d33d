//! ctfkit - Entry point
//!
//! Parses CLI arguments, validates configuration, starts the MCP server on
//! stdio transport, and handles graceful shutdown.

use clap::Parser;
use rmcp::service::ServiceExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ctfkit::config::{Args, Config};
use ctfkit::error::Result;
use ctfkit::server::{CtfKitServer, SHUTDOWN_GRACE};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging to stderr (stdout is for MCP JSON-RPC)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments
    let args = Args::parse();

    // Validate and create config
    let config = Config::from_args(args)?;

    info!("ctfkit v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("SSH user {} on port {}", config.user, config.port);
    info!(
        "Timeout: {}ms, attempt timeout: {}ms, Max chars: {}",
        config.timeout_ms,
        config.attempt_timeout_ms,
        config
            .max_chars
            .map_or("unlimited".to_string(), |n| n.to_string())
    );
    info!(
        "Results logged to {}, artifacts in {}",
        config.log_dir.display(),
        config.output_dir.display()
    );

    // Create MCP server
    let server = CtfKitServer::new(config).await?;

    info!("ctfkit running on stdio");

    // Create a clone for the shutdown handler
    let server_for_shutdown = server.clone();

    // Spawn a task to handle shutdown signals
    let shutdown_handle = tokio::spawn(async move {
        // Wait for Ctrl+C or SIGTERM
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = terminate() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        // Cancel in-flight operations, let them restore, flush the result log
        server_for_shutdown.shutdown(SHUTDOWN_GRACE).await;
        std::process::exit(130);
    });

    let result = match server.clone().serve(rmcp::transport::io::stdio()).await {
        Ok(running_server) => {
            info!("MCP server is serving...");
            if let Err(e) = running_server.waiting().await {
                error!("Server error: {}", e);
            }
            Ok(())
        }
        Err(e) => {
            error!("Failed to start MCP server: {}", e);
            Err(ctfkit::CtfKitError::connection(e.to_string()))
        }
    };

    // Cancel the shutdown handler if we exit normally
    shutdown_handle.abort();
    server.shutdown(SHUTDOWN_GRACE).await;

    info!("ctfkit stopped");

    result
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
