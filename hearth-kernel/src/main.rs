/**
 * HEARTH KERNEL - Point d'entrée du coordinateur domotique
 *
 * RÔLE : Orchestration des modules : config, store, registre des nœuds,
 * contrôleur anti-starvation du four, observation des nœuds, API HTTP.
 *
 * ARCHITECTURE : API REST (enregistrement, télémétrie, seuils) + commandes
 * HTTP vers les nœuds + notifications MQTT des nœuds vers le kernel.
 */

mod config;
mod controller;
mod error;
mod http;
mod ingest;
mod models;
mod observer;
mod registry;
mod state;
mod store;
#[cfg(test)]
mod testing;
mod transport;

use crate::config::load_config;
use crate::controller::FurnaceController;
use crate::http::AppState;
use crate::registry::{NodeRegistry, SharedRegistry};
use crate::store::{FileStore, SharedStore};
use crate::transport::{NodeTransport, SharedTransport};

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    // persistance des flux
    let store: SharedStore = Arc::new(
        FileStore::open(&cfg.data_dir, cfg.reset_store_on_start)
            .with_context(|| format!("cannot open data dir {}", cfg.data_dir))?,
    );

    // registre, avec /res_data et /res_prediction servis par le kernel
    let registry: SharedRegistry = Arc::new(
        NodeRegistry::with_server_resources(store.clone(), &cfg.advertised_address)
            .context("cannot register server resources")?,
    );

    let transport: SharedTransport =
        Arc::new(NodeTransport::new(cfg.nodes.clone()).context("cannot build node transport")?);

    let controller = Arc::new(FurnaceController::new(
        cfg.starvation,
        registry.clone(),
        transport.clone(),
        cfg.nodes.command_timeout(),
    ));

    // attente des nœuds four / edge puis abonnement
    observer::spawn_observers(
        registry.clone(),
        transport,
        controller.clone(),
        store.clone(),
        cfg.furnace_log_interval(),
    );

    let app = http::build_router(AppState { registry, controller, store });

    let addr: SocketAddr = cfg.bind_addr.parse().with_context(|| format!("invalid bind_addr {}", cfg.bind_addr))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("cannot bind {addr}"))?;
    info!("[kernel] listening on http://{addr}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("[kernel] stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[kernel] cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("[kernel] shutdown requested");
}
