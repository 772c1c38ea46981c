//! kedged: the Kedge daemon.
//!
//! Single binary that assembles the controller:
//! - State store (redb)
//! - Scaler catalog + registry
//! - Per-target reconcile loops and the store sync loop
//! - REST API, metric query endpoint, Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! kedged run --config /etc/kedge/kedge.toml --port 8080
//! kedged config --config /etc/kedge/kedge.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kedge_api::{ApiState, build_router};
use kedge_autoscale::{
    Engine, MetricQueryService, Policy, Reconciler, ScaleCallback, ScaleFuture,
};
use kedge_core::DaemonConfig;
use kedge_scaler::{ScalerCatalog, ScalerRegistry, StaticAuthResolver};
use kedge_state::StateStore;

const DEFAULT_FILTER: &str = "info,kedged=debug,kedge_autoscale=debug,kedge_scaler=debug";

#[derive(Parser)]
#[command(name = "kedged", about = "Kedge autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and API server.
    Run {
        /// Path to kedge.toml. Defaults apply if the file is missing.
        #[arg(long, default_value = "/etc/kedge/kedge.toml")]
        config: PathBuf,

        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `state.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long, default_value = "/etc/kedge/kedge.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let mut daemon_config = DaemonConfig::load_or_default(&config)?;
            if let Some(port) = port {
                daemon_config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                daemon_config.state.data_dir = data_dir;
            }
            run(&config, daemon_config).await
        }
        Command::Config { config } => {
            let daemon_config = DaemonConfig::load_or_default(&config)?;
            print!("{}", daemon_config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Replica changes are handed to the workload controller; here they are
/// recorded in the log.
fn log_scale_fn() -> ScaleCallback {
    Arc::new(|target_id: &str, replicas: u32| -> ScaleFuture {
        info!(%target_id, replicas, "replica count published");
        Box::pin(async { Ok(()) })
    })
}

async fn run(config_path: &Path, config: DaemonConfig) -> anyhow::Result<()> {
    info!(config = ?config_path, "Kedge daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.state.data_dir)?;
    let db_path = config.state.data_dir.join("kedge.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let catalog = ScalerCatalog::builtin();
    info!(trigger_types = ?catalog.trigger_types(), "scaler catalog loaded");

    let engine = Arc::new(Engine::new(
        catalog,
        Arc::new(ScalerRegistry::default()),
        Arc::new(StaticAuthResolver::new(config.auth.clone())),
        config.controller.scaler_timeout(),
    ));

    let reconciler = Arc::new(
        Reconciler::new(
            store.clone(),
            Arc::clone(&engine),
            Policy::new(config.controller.clamp_paused_replicas),
        )
        .with_scale_fn(log_scale_fn()),
    );

    let query = Arc::new(MetricQueryService::new(
        store.clone(),
        engine,
        config.controller.query_timeout(),
    ));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sync = Arc::clone(&reconciler);
    let sync_interval = Duration::from_secs(config.controller.sync_interval_secs.max(1));
    let sync_handle = tokio::spawn(async move {
        sync.run_sync(sync_interval, shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        store,
        reconciler: Arc::clone(&reconciler),
        query,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for the sync loop, then stop every target loop and scaler.
    let _ = sync_handle.await;
    reconciler.stop_all().await;

    info!("Kedge daemon stopped");
    Ok(())
}
