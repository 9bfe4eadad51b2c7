use std::time::Duration;

use serde::Deserialize;
use solarlink_domain::backoff::BackoffPolicy;
use solarlink_domain::policy::PollPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub redis_url: String,
    pub redis_key_prefix: String,
    pub inverter_host: String,
    pub inverter_port: u16,
    pub inverter_serial: u32,
    pub modbus_slave_id: u8,
    pub socket_timeout_secs: u64,
    pub register_retry_limit: u32,
    pub register_retry_delay_ms: u64,
    pub register_read_spacing_ms: u64,
    pub active_interval_secs: u64,
    pub idle_interval_secs: u64,
    pub activity_timeout_secs: u64,
    pub freshness_margin_secs: u64,
    pub activity_margin_secs: u64,
    pub lock_ttl_secs: u64,
    pub force_poll_ttl_secs: u64,
    pub wait_timeout_secs: u64,
    pub wait_granularity_ms: u64,
    pub backoff_initial_secs: u64,
    pub backoff_factor: f64,
    pub backoff_max_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 5000)?
            .set_default("log_level", "info")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("redis_key_prefix", "solarlink")?
            .set_default("inverter_host", "192.168.1.100")?
            .set_default("inverter_port", 8899)?
            .set_default("inverter_serial", 0)?
            .set_default("modbus_slave_id", 1)?
            .set_default("socket_timeout_secs", 8)?
            .set_default("register_retry_limit", 3)?
            .set_default("register_retry_delay_ms", 500)?
            .set_default("register_read_spacing_ms", 100)?
            .set_default("active_interval_secs", 3)?
            .set_default("idle_interval_secs", 300)?
            .set_default("activity_timeout_secs", 120)?
            .set_default("freshness_margin_secs", 2)?
            .set_default("activity_margin_secs", 60)?
            .set_default("lock_ttl_secs", 20)?
            .set_default("force_poll_ttl_secs", 10)?
            .set_default("wait_timeout_secs", 15)?
            .set_default("wait_granularity_ms", 200)?
            .set_default("backoff_initial_secs", 5)?
            .set_default("backoff_factor", 2.0)?
            .set_default("backoff_max_secs", 120)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            active_interval: Duration::from_secs(self.active_interval_secs),
            idle_interval: Duration::from_secs(self.idle_interval_secs),
            activity_timeout: Duration::from_secs(self.activity_timeout_secs),
            freshness_margin: Duration::from_secs(self.freshness_margin_secs),
            activity_margin: Duration::from_secs(self.activity_margin_secs),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            force_poll_ttl: Duration::from_secs(self.force_poll_ttl_secs),
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            wait_granularity: Duration::from_millis(self.wait_granularity_ms),
            backoff: BackoffPolicy {
                initial: Duration::from_secs(self.backoff_initial_secs),
                factor: self.backoff_factor,
                max: Duration::from_secs(self.backoff_max_secs),
            },
        }
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}
