//! vACDM tracker - always-on A-CDM client service

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use acdm_server::config::{Config, PluginConfig};
use acdm_server::persistence::{self, pilots as pilots_db};
use acdm_server::state::AppState;
use acdm_server::{api, logging, loops};

const PERSIST_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let (log_control, log_rx) = logging::init()?;
    tracing::info!("Starting vACDM tracker {}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    let plugin = match PluginConfig::load(&config.config_file) {
        Ok(plugin) => plugin,
        Err(err) => {
            tracing::error!(
                "Failed to read {}: {} (using defaults)",
                config.config_file,
                err
            );
            PluginConfig::default()
        }
    };

    let db = persistence::init_database(&config.database_path, config.database_max_connections)
        .await?;
    let (persist_tx, persist_rx) = mpsc::channel(PERSIST_QUEUE_CAPACITY);
    let state = Arc::new(
        AppState::new(config.clone(), &plugin, log_control)
            .with_database(db.clone())
            .with_persistence(persist_tx),
    );

    match pilots_db::load_all_records(db.pool()).await {
        Ok(records) => {
            let count = state.restore_pilots(records);
            tracing::info!("Restored {} pilot records", count);
        }
        Err(err) => tracing::warn!("Failed to restore pilot records: {}", err),
    }

    // Start background loops
    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = vec![
        tokio::spawn(loops::sync_loop::run_sync_loop(
            state.clone(),
            shutdown_tx.subscribe(),
        )),
        tokio::spawn(loops::persist_loop::run_persist_loop(
            db.clone(),
            state.clone(),
            persist_rx,
            shutdown_tx.subscribe(),
        )),
        tokio::spawn(loops::log_persist_loop::run_log_persist_loop(
            db.clone(),
            state.clone(),
            log_rx,
            shutdown_tx.subscribe(),
        )),
        tokio::spawn(loops::auth_loop::run_auth_loop(
            state.clone(),
            shutdown_tx.subscribe(),
        )),
        tokio::spawn(loops::flow_measure_loop::run_flow_measure_loop(
            state.clone(),
            shutdown_tx.subscribe(),
        )),
    ];

    let app = api::app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stopping background loops");
    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::warn!("Background loop ended abnormally: {}", err);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
}
