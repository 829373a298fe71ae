//! Vidra engine - headless runner
//!
//! Runs the lobby-video engine against a relay server using an in-memory
//! page built from a layout file. Useful for driving the engine end to
//! end without a browser: transitions, pushes and analytics all show up
//! in the logs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidra_common::config::{default_data_dir, resolve_application_key, resolve_server_url};
use vidra_engine::config::EngineConfig;
use vidra_engine::local::JsonFileStore;
use vidra_engine::page::{MemoryPage, Page};
use vidra_engine::transport::{ReconnectPolicy, Transport};
use vidra_engine::Engine;

/// Command-line arguments for the vidra-engine runner
#[derive(Parser, Debug)]
#[command(name = "vidra-engine")]
#[command(about = "Headless runner for the Vidra lobby-video engine")]
#[command(version)]
struct Args {
    /// Relay server WebSocket URL
    #[arg(short, long, env = "VIDRA_SERVER_URL")]
    server_url: Option<String>,

    /// Application key identifying this embedder
    #[arg(short, long, env = "VIDRA_APPLICATION_KEY")]
    application_key: Option<String>,

    /// Page layout TOML file (groups and game tiles)
    #[arg(short, long, env = "VIDRA_LAYOUT")]
    layout: Option<PathBuf>,

    /// Directory for persisted local state
    #[arg(long, env = "VIDRA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Disable analytics collection
    #[arg(long)]
    disable_analytics: bool,
}

/// Demo layout used when no layout file is given
const DEMO_LAYOUT: &str = r#"
user_agent = "vidra-headless"

[viewport]
width = 1280
height = 800

[[section]]
group = "lobby-top"

[[section.game]]
id = "demo-game-1"
poster = "https://cdn.example/demo-game-1.jpg"

[[section.game]]
id = "demo-game-2"
poster = "https://cdn.example/demo-game-2.jpg"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidra_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let server_url = resolve_server_url(args.server_url.as_deref());
    let application_key = resolve_application_key(args.application_key.as_deref());
    info!("Starting Vidra engine against {}", server_url);

    let layout_text = match &args.layout {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layout file {}", path.display()))?,
        None => DEMO_LAYOUT.to_string(),
    };
    let page = Arc::new(
        MemoryPage::from_layout_str(&layout_text).context("Failed to parse layout file")?,
    );
    info!("Page loaded with {} game tiles", page.game_elements().len());

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    let local = Arc::new(JsonFileStore::open(&data_dir.join("local.json")));

    let transport = Transport::new(&server_url, application_key, ReconnectPolicy::default());

    let engine = Engine::new(
        page,
        transport,
        local,
        EngineConfig::default(),
        !args.disable_analytics,
    );
    engine.start();

    shutdown_signal().await;
    info!("Shutting down");
    engine.stop();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
