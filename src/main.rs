use std::net::SocketAddr;

use anyhow::anyhow;
use axum::http::{header::CONTENT_TYPE, Method};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use voxgate::{routes, AppState, ServerConfig};

/// voxgate - Real-time voice-agent gateway
#[derive(Parser, Debug)]
#[command(name = "voxgate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must happen before config loading)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    // Initialize tracing from the configured log level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let address = config.address();
    let enable_realtime = config.enable_realtime;
    info!(mode = config.mode(), "Starting voxgate on {address}");

    // Create application state (spawns the session reaper)
    let app_state = AppState::new(config);

    let mut app = routes::api::create_api_router();
    if enable_realtime {
        app = app.merge(routes::voice::create_voice_router());
    } else {
        info!("Realtime pipeline disabled; serving the HTTP surface only");
    }

    // Browsers connect directly from the page serving the microphone UI
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let app = app.with_state(app_state).layer(cors_layer);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let listener = TcpListener::bind(&socket_addr).await?;
    info!("Server listening on http://{socket_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
