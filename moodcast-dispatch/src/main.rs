//! moodcast-dispatch - mood-to-music dispatcher service
//!
//! Serves the chat event API over HTTP. Tracks and the selection log live in
//! a GitHub repository (or an in-process store for local runs).

use anyhow::{Context, Result};
use clap::Parser;
use moodcast_common::config::{resolve_github_token, ConfigLoader, StoreBackend};
use moodcast_dispatch::store::build_client;
use moodcast_dispatch::{build_router, AppState, ChatBridge, DispatchOrchestrator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "moodcast-dispatch")]
#[command(about = "Mood-to-music dispatcher", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket address to bind, overriding the config file
    #[arg(short, long, env = "MOODCAST_BIND")]
    bind: Option<String>,

    /// Log level, overriding the config file (RUST_LOG wins over both)
    #[arg(long, env = "MOODCAST_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loader = ConfigLoader::new(args.config.clone());
    let config = loader.load().context("Failed to load configuration")?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(fmt::layer().with_target(true))
        .init();

    info!("Starting moodcast-dispatch v{}", env!("CARGO_PKG_VERSION"));
    match loader.locate() {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    let token = resolve_github_token(config.store.token.as_deref());
    match config.store.backend {
        StoreBackend::Github => {
            info!(
                "Remote store: github {}/{}@{}",
                config.store.owner, config.store.repo, config.store.branch
            );
            if token.is_none() && config.audit.enabled {
                warn!("No GitHub token configured; track listing may work but audit log writes will fail");
            }
        }
        StoreBackend::Memory => warn!("Remote store: in-memory (contents are lost on exit)"),
    }

    let store = build_client(&config.store, token).context("Failed to build remote store client")?;
    let orchestrator = Arc::new(DispatchOrchestrator::from_config(store, &config));
    let bridge = Arc::new(ChatBridge::new(
        Arc::clone(&orchestrator),
        config.moods.buttons.clone(),
    ));

    let state = AppState::new(bridge, Arc::clone(&orchestrator), config.server.max_upload_bytes);
    let app = build_router(state);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Waiting for {} pending audit writes", orchestrator.pending_audits());
    orchestrator.flush_audits().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
