use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use solarlink_domain::ports::store::{StoreError, TelemetryStore};
use solarlink_domain::ports::BoxFuture;
use solarlink_domain::reading::CachedSnapshot;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_PREFIX: &str = "solarlink";

/// Deletes the lock key only when it still holds this process's token, so a
/// holder that overran the TTL cannot free a successor's lock.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisTelemetryStore {
    manager: ConnectionManager,
    prefix: String,
    lock_token: Arc<Mutex<Option<String>>>,
}

impl RedisTelemetryStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
            lock_token: Arc::new(Mutex::new(None)),
        })
    }

    fn snapshot_key(&self) -> String {
        format!("{}:snapshot", self.prefix)
    }

    fn lock_key(&self) -> String {
        format!("{}:poll_lock", self.prefix)
    }

    fn activity_key(&self) -> String {
        format!("{}:last_activity", self.prefix)
    }

    fn force_poll_key(&self) -> String {
        format!("{}:force_poll", self.prefix)
    }

    fn ttl_ms(ttl: Duration) -> u64 {
        let ms = ttl.as_millis() as u64;
        if ms == 0 { 1 } else { ms }
    }
}

impl TelemetryStore for RedisTelemetryStore {
    fn get_snapshot(&self) -> BoxFuture<'_, Result<Option<CachedSnapshot>, StoreError>> {
        let key = self.snapshot_key();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: Option<String> = conn
                .get(key)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            match value {
                Some(payload) => match serde_json::from_str(&payload) {
                    Ok(snapshot) => Ok(Some(snapshot)),
                    Err(err) => {
                        // A corrupt payload heals itself on the next poll
                        // cycle; serve "missing" rather than failing reads.
                        warn!(error = %err, "cached snapshot is unparseable; treating as absent");
                        Ok(None)
                    }
                },
                None => Ok(None),
            }
        })
    }

    fn put_snapshot(&self, snapshot: &CachedSnapshot) -> BoxFuture<'_, Result<(), StoreError>> {
        let key = self.snapshot_key();
        let snapshot = snapshot.clone();
        Box::pin(async move {
            let payload = serde_json::to_string(&snapshot)
                .map_err(|err| StoreError::Serialization(err.to_string()))?;
            let mut conn = self.manager.clone();
            let _: () = conn
                .set(key, payload)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn try_acquire_poll_lock(&self, ttl: Duration) -> BoxFuture<'_, Result<bool, StoreError>> {
        let key = self.lock_key();
        Box::pin(async move {
            let token = Uuid::new_v4().to_string();
            let mut conn = self.manager.clone();
            let result: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(Self::ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;

            if result.is_some() {
                *self.lock_token.lock().await = Some(token);
                Ok(true)
            } else {
                Ok(false)
            }
        })
    }

    fn release_poll_lock(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        let key = self.lock_key();
        Box::pin(async move {
            let token = self.lock_token.lock().await.take();
            let Some(token) = token else {
                return Ok(());
            };
            let mut conn = self.manager.clone();
            let _: i64 = redis::Script::new(RELEASE_LOCK_SCRIPT)
                .key(key)
                .arg(token)
                .invoke_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn mark_activity(&self, now: f64, ttl: Duration) -> BoxFuture<'_, Result<(), StoreError>> {
        let key = self.activity_key();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg(now)
                .arg("PX")
                .arg(Self::ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn last_activity(&self) -> BoxFuture<'_, Result<Option<f64>, StoreError>> {
        let key = self.activity_key();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: Option<String> = conn
                .get(key)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            Ok(value.and_then(|raw| match raw.parse::<f64>() {
                Ok(ts) => Some(ts),
                Err(err) => {
                    warn!(error = %err, "activity marker is unparseable; treating as absent");
                    None
                }
            }))
        })
    }

    fn request_force_poll(&self, ttl: Duration) -> BoxFuture<'_, Result<(), StoreError>> {
        let key = self.force_poll_key();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("PX")
                .arg(Self::ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn take_force_poll(&self) -> BoxFuture<'_, Result<bool, StoreError>> {
        let key = self.force_poll_key();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            // GETDEL keeps consumption atomic: at most one loop iteration
            // observes each request.
            let value: Option<String> = redis::cmd("GETDEL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            Ok(value.is_some())
        })
    }
}
