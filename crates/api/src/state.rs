use std::sync::Arc;

use solarlink_domain::ports::store::TelemetryStore;
use solarlink_domain::refresh::SnapshotService;
use solarlink_infra::config::AppConfig;
use solarlink_infra::store::RedisTelemetryStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn TelemetryStore>,
    pub snapshots: SnapshotService,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store = RedisTelemetryStore::connect_with_prefix(
            &config.redis_url,
            config.redis_key_prefix.clone(),
        )
        .await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn TelemetryStore>) -> Self {
        let snapshots = SnapshotService::new(store.clone(), config.poll_policy());
        Self {
            config,
            store,
            snapshots,
        }
    }
}
