//! Burrow Relay Server
//!
//! Public half of the reverse HTTP tunnel: accepts internet HTTP
//! requests on one port and relays them over the signed back-channel to
//! a connected tunnel agent.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use burrow_proto::FrameSigner;
use burrow_relay::registry::{ClientRegistry, spawn_eviction_task};
use burrow_relay::router::RequestRouter;
use burrow_relay::server::{FrontendConfig, http_frontend, tunnel};

#[derive(Parser, Debug)]
#[command(name = "burrow-relay")]
#[command(
    version,
    about = "Burrow relay - public HTTP frontend and tunnel listener"
)]
struct Args {
    /// Bind address for both listeners.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Tunnel port (framed back-channel from agents).
    #[arg(long, default_value_t = 8081)]
    tcp_port: u16,

    /// Public HTTP port.
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Shared HMAC-SHA256 secret; must match the agents.
    #[arg(long, env = "BURROW_SECRET_KEY")]
    secret_key: String,

    /// Seconds a forwarded request may wait for its response frame.
    #[arg(long, default_value_t = 180)]
    pending_timeout_secs: u64,

    /// Cap on public request bodies, in bytes.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    max_body_bytes: usize,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    burrow_core::init_tracing("burrow_relay=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %args.host,
        tcp_port = args.tcp_port,
        http_port = args.http_port,
        "Starting burrow-relay"
    );

    let signer = FrameSigner::new(args.secret_key.as_bytes());
    let registry = ClientRegistry::new();
    let router = RequestRouter::new(
        registry.clone(),
        Duration::from_secs(args.pending_timeout_secs),
    );

    let http_listener = TcpListener::bind((args.host, args.http_port)).await?;
    let tunnel_listener = TcpListener::bind((args.host, args.tcp_port)).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = spawn_eviction_task(registry.clone(), shutdown_rx);

    let frontend = tokio::spawn(http_frontend::serve(
        http_listener,
        router,
        FrontendConfig {
            max_body_bytes: args.max_body_bytes,
        },
    ));
    let back_channel = tokio::spawn(tunnel::serve(tunnel_listener, registry, signer));

    tokio::select! {
        result = frontend => result??,
        result = back_channel => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    shutdown_tx.send(true).ok();
    sweeper.abort();
    info!("Relay stopped");
    Ok(())
}
