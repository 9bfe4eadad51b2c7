mod error;
mod middleware;
mod observability;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use solarlink_domain::poll::{PollOutcome, Poller};
use solarlink_infra::inverter::SolarmanClient;
use solarlink_infra::{config::AppConfig, logging::init_tracing};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let state = state::AppState::new(config.clone()).await?;

    // The API runs its own poll loop; the shared lock keeps it from
    // competing with dedicated worker processes.
    let device = Arc::new(SolarmanClient::new(&config));
    let poller = Poller::new(state.store.clone(), device, config.poll_policy())
        .with_observer(Arc::new(|outcome: &PollOutcome| {
            observability::register_poll_outcome(outcome.as_str());
        }));
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let poller_task = tokio::spawn(poller.run(async move {
        let _ = shutdown_rx.changed().await;
    }));

    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "server exited");
            err
        })?;

    let _ = shutdown_tx.send(true);
    let _ = poller_task.await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests;
