/**
 * CLUSTIL KERNEL - Entry point of the fleet dashboard backend
 *
 * ROLE: wires config, memo store, snapshot provider, scheduler and HTTP.
 * Samples the fleet on a fixed cadence and pushes full/delta snapshots to
 * every connected viewer over an event stream.
 */

mod config;
mod dashboard;
mod delta;
mod health;
mod http;
mod hub;
mod ports;
mod providers;
mod scheduler;
mod state;

use crate::config::load_config;
use crate::dashboard::Dashboard;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::ports::create_annotation_store;
use crate::providers::create_provider;
use crate::scheduler::spawn_scheduler;
use crate::state::new_state;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clustil_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    let addr = cfg.bind_addr()?;
    let cadence = cfg.cadence();

    let store = create_annotation_store(cfg.annotations_path.as_deref())
        .context("failed to open annotation store")?;
    let provider = create_provider(&cfg);
    info!(
        "provider={} store={} ({} memos)",
        provider.name(),
        store.kind(),
        store.len()
    );

    let dashboard = new_state(Dashboard::new(provider, store, cadence));
    spawn_scheduler(dashboard.clone(), cadence);

    let app = http::build_router(AppState {
        dashboard,
        health: HealthTracker::new(),
    });

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
