mod observability;

use std::sync::Arc;

use solarlink_domain::poll::{PollOutcome, Poller};
use solarlink_infra::inverter::SolarmanClient;
use solarlink_infra::store::RedisTelemetryStore;
use solarlink_infra::{config::AppConfig, logging::init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let store = RedisTelemetryStore::connect_with_prefix(
        &config.redis_url,
        config.redis_key_prefix.clone(),
    )
    .await?;
    let device = Arc::new(SolarmanClient::new(&config));

    let poller = Poller::new(Arc::new(store), device, config.poll_policy()).with_observer(
        Arc::new(|outcome: &PollOutcome| {
            observability::register_poll_outcome(outcome.as_str(), outcome.idle());
        }),
    );

    info!(
        inverter = %config.inverter_host,
        port = config.inverter_port,
        "worker starting"
    );
    poller
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    info!("worker shutdown");

    Ok(())
}
