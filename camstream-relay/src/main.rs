//! camstream relay: entry point.
//!
//! ```text
//! camstream-relay                      Listen on 127.0.0.1:8765
//! camstream-relay --listen <addr>      Listen elsewhere
//! ```

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use camstream_core::network::RelayServer;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "camstream-relay", about = "Route camstream envelopes between peers")]
struct Cli {
    /// Address to accept WebSocket connections on.
    #[arg(short, long, default_value = "127.0.0.1:8765")]
    listen: String,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Init tracing.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("camstream-relay v{}", env!("CARGO_PKG_VERSION"));

    let relay = RelayServer::bind(cli.listen.as_str()).await?;
    let shutdown = CancellationToken::new();

    // Ctrl-C handler.
    let stop = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; shutting down");
        stop.cancel();
    });

    relay.run(shutdown).await?;
    Ok(())
}
