//! Headless host for a Delve world.

mod api;
mod bundles;
mod checkpoint;
mod database;
mod host;
mod telemetry;
mod transport;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use delve_core::ServerConfig;
use delve_mods::{Runtime, RuntimeConfig, Sandbox};
use delve_net::Session;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "delve-server", version, about = "Host a Delve world")]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mod bundle to load (URL or directory), may be repeated
    #[arg(long = "mod", value_name = "URL_OR_DIR")]
    mods: Vec<String>,

    /// Simulate and autosave without serving participants
    #[arg(long)]
    headless: bool,

    #[arg(long)]
    port: Option<u16>,

    /// World seed for newly generated worlds
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    database: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => ServerConfig::default(),
        };

        config.mods.extend(self.mods);
        config.headless |= self.headless;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(seed) = self.seed {
            config.game.seed = seed;
        }
        if let Some(database) = self.database {
            config.database_path = database;
        }
        Ok(config)
    }
}

pub(crate) fn router(state: api::AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/stats", get(api::get_stats))
        .route("/api/map", get(api::get_map))
        .route("/api/save", post(api::save))
        .route("/session", get(api::session_socket))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn load_mods(config: &ServerConfig) -> Result<Sandbox> {
    let runtime = Runtime::new(RuntimeConfig::from(&config.game.mods))?;
    let client = bundles::http_client()?;
    let mut sandbox = Sandbox::new();

    for location in &config.mods {
        let loaded = match bundles::fetch(&client, location).await {
            Ok(bundle) => runtime.load_bundle(&mut sandbox, bundle).map_err(Into::into),
            Err(e) => Err(e),
        };
        match loaded {
            Ok(manifest) => info!(name = %manifest.name, version = %manifest.version, "Mod loaded"),
            Err(e) => warn!(location = %location, error = %e, "Mod skipped"),
        }
    }

    Ok(sandbox)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;

    telemetry::init_telemetry(config.otel_endpoint.as_deref())?;

    info!(
        "Starting Delve server on {}:{} (headless: {})",
        config.bind_address, config.port, config.headless
    );

    let db = database::Database::new(&config.database_path).await?;
    db.migrate().await?;

    let checkpoints = checkpoint::CheckpointManager::new(db.clone(), config.save_key.clone());
    let saved = checkpoints.restore_latest().await?;

    let sandbox = load_mods(&config).await?;
    let (hub, transport) = transport::WsHub::new();
    let session = Session::host(
        config.game.clone(),
        saved.as_ref().map(|checkpoint| checkpoint.map.as_slice()),
        sandbox,
        transport,
        "server",
    );

    let status = Arc::new(RwLock::new(host::HostStatus::default()));
    let (command_tx, command_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let host = host::HostLoop::new(
        session,
        checkpoints,
        status.clone(),
        config.tick_rate_hz,
        config.autosave_interval_secs,
    );
    let simulation = tokio::spawn(host.run(command_rx, shutdown_rx));

    if config.headless {
        shutdown_signal().await;
    } else {
        let app = router(api::AppState {
            hub,
            commands: command_tx,
            status,
            db,
        });

        let addr = format!("{}:{}", config.bind_address, config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    let _ = shutdown_tx.send(true);
    simulation.await.context("simulation task panicked")?;

    telemetry::shutdown_telemetry();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
