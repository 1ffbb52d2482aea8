//! sandpit-daemon - HTTP service running untrusted snippets in throwaway workspaces
//!
//! POST /api/execute with `{ language, code, input? }` and get back the
//! captured output of the run.

use anyhow::Result;
use clap::Parser;
use futures_util::StreamExt;
use sandpit_core::Sandbox;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod server;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sandpit=info".parse()?))
        .init();

    tracing::info!("sandpit-daemon starting");

    let config = DaemonConfig::parse();
    let sandbox = Sandbox::new(config.sandbox_config())?;
    tracing::info!(
        listen = %config.listen,
        max_concurrent = config.max_concurrent,
        timeout_ms = config.timeout_ms,
        "configuration loaded"
    );

    let listener = TcpListener::bind(config.listen).await?;
    tracing::info!(addr = %config.listen, "listening");

    let app = server::router(sandbox, config.body_limit());
    server::run(listener, app, shutdown_signal()).await?;

    tracing::info!("sandpit-daemon stopped");
    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers, graceful shutdown disabled");
            return std::future::pending().await;
        }
    };

    if let Some(signal) = signals.next().await {
        tracing::info!(signal, "shutdown requested, draining in-flight requests");
    }
    signals.handle().close();
}
