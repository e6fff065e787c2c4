//! camstream client: entry point.
//!
//! ```text
//! camstream-client                   Stream until the analyzer answers
//! camstream-client --config <path>   Load a custom config TOML
//! camstream-client --server <url>    Override the relay URL
//! camstream-client --gen-config      Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use camstream_client::camera::{TestPatternCamera, join_capture};
use camstream_client::config::ClientConfig;
use camstream_client::sink::ConsoleSink;
use camstream_core::network::WebSocketConnector;
use camstream_core::state::SessionState;
use camstream_core::stream::{CaptureSource, PresentationSink, SessionController};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "camstream-client", about = "Stream camera frames to a remote analyzer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "camstream-client.toml")]
    config: PathBuf,

    /// Relay URL, overriding `network.server_url`.
    #[arg(short, long)]
    server: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let mut config = ClientConfig::load(&cli.config);
    if let Some(server) = cli.server {
        config.network.server_url = server;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::File::create(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }

    let session_config = config.to_session_config();
    let (width, height, fps) = config.camera_dimensions();
    info!("camstream-client v{}", env!("CARGO_PKG_VERSION"));
    info!("relay: {}", session_config.endpoint());
    info!("analyzer: {}", session_config.analyzer_id);
    info!("camera: {width}x{height} @ {fps} fps, quality {}", session_config.jpeg_quality);

    let camera = Arc::new(TestPatternCamera::new(width, height, fps));
    let sink = Arc::new(ConsoleSink::new());
    let session = SessionController::new(
        session_config,
        Arc::new(WebSocketConnector),
        Arc::clone(&camera) as Arc<dyn CaptureSource>,
        Arc::clone(&sink) as Arc<dyn PresentationSink>,
    )?;

    session.start()?;
    let capture = {
        let camera = Arc::clone(&camera);
        let session = session.clone();
        tokio::spawn(async move { camera.run(session).await })
    };

    // Ctrl-C handler.
    let terminal = tokio::select! {
        state = session.wait_terminal() => state,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received; shutting down");
            session.shutdown();
            session.wait_terminal().await
        }
    };
    join_capture(capture).await;

    let stats = session.stats();
    info!(
        offered = stats.frames_offered,
        sent = stats.frames_sent,
        dropped = stats.frames_dropped,
        "session finished: {terminal}"
    );

    match session.result() {
        Some(result) => println!("Result: {result}"),
        None => println!("No result received"),
    }

    if terminal == SessionState::Failed {
        error!("session failed");
        std::process::exit(1);
    }
    Ok(())
}
