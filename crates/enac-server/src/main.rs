//! enac server
//!
//! Single binary that, for every bind target, runs:
//! - an HTTPS server (HTTP/1.1, HTTP/2) on TCP
//! - an HTTP/3 server on QUIC, same port, with pluggable congestion control

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use enac_server::config::{Cli, ServerConfig};
use enac_server::credentials::Credentials;
use enac_server::listener::ListenerContext;
use enac_server::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::from_cli(cli).context("invalid configuration")?;

    // ── Logging ─────────────────────────────────────────────────
    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Credentials ─────────────────────────────────────────────
    let credentials = Credentials::load(&config.cert, &config.key)
        .context("failed to load TLS credentials")?;

    // ── Listeners ───────────────────────────────────────────────
    let ctx = ListenerContext::from_config(&config, Arc::new(credentials));
    let orchestrator = Orchestrator::new(config.bind.iter().cloned(), &ctx);

    info!(
        bind = ?config.bind,
        congestion = %config.congestion.control_type,
        hystart = %config.congestion.hystart,
        qlog = config.qlog,
        www = ?config.www,
        "enac-server starting"
    );

    tokio::select! {
        outcomes = orchestrator.run() => {
            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            info!(listeners = outcomes.len(), failed, "all listeners finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
