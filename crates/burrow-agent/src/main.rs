//! Burrow Tunnel Agent
//!
//! Dials out to a burrow-relay, registers, and forwards every tunnelled
//! request to a local HTTP service (e.g. an inference API behind NAT).

use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use burrow_agent::tunnel::{AgentConfig, TunnelAgent};

#[derive(Parser, Debug)]
#[command(name = "burrow-agent")]
#[command(
    version,
    about = "Burrow agent - connects a private HTTP service to a public relay"
)]
struct Args {
    /// Relay address as seen from this machine.
    #[arg(long)]
    server_host: String,

    /// Relay tunnel port.
    #[arg(long, default_value_t = 8081)]
    server_port: u16,

    /// Base URL of the local service requests are forwarded to.
    #[arg(long, default_value = "http://localhost:5001")]
    local_api_url: String,

    /// Shared HMAC-SHA256 secret; must match the relay.
    #[arg(long, env = "BURROW_SECRET_KEY")]
    secret_key: String,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    burrow_core::init_tracing("burrow_agent=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server_host = %args.server_host,
        server_port = args.server_port,
        local_api_url = %args.local_api_url,
        "Starting burrow-agent"
    );

    probe_local_api(&args.local_api_url).await;

    let config = AgentConfig::new(
        args.server_host,
        args.server_port,
        args.local_api_url,
        args.secret_key,
    );
    let agent = TunnelAgent::new(config)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            shutdown_tx.send(true).ok();
        }
    });

    agent.run(shutdown_rx).await;

    info!("Agent stopped");
    Ok(())
}

/// Best-effort startup probe of the local service's health endpoint.
/// A failure is logged, not fatal: the service may simply not be up yet.
async fn probe_local_api(local_api_url: &str) {
    let url = format!("{}/health", local_api_url.trim_end_matches('/'));
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Could not build health-check client");
            return;
        }
    };

    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            info!(url = %url, "Local API health check passed");
        }
        Ok(response) => {
            warn!(url = %url, status = %response.status(), "Local API health check failed");
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Cannot reach local API");
        }
    }
}
