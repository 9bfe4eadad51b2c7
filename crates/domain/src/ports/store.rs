use std::time::Duration;

use thiserror::Error;

use super::BoxFuture;
use crate::reading::CachedSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("telemetry store unavailable: {0}")]
    Unavailable(String),
    #[error("telemetry store serialization error: {0}")]
    Serialization(String),
    #[error("telemetry store operation failed: {0}")]
    Operation(String),
}

/// Shared coordination state for all workers: the cached snapshot, the poll
/// lock, the activity marker, and the one-shot force-poll flag. All mutation
/// goes through the store's atomic primitives; no in-process locks are
/// involved in cross-worker exclusion.
pub trait TelemetryStore: Send + Sync {
    fn get_snapshot(&self) -> BoxFuture<'_, Result<Option<CachedSnapshot>, StoreError>>;

    /// Whole-structure atomic overwrite; readers never observe a partial
    /// snapshot.
    fn put_snapshot(&self, snapshot: &CachedSnapshot) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Atomic create-if-absent with expiry. Returns false when another
    /// holder's lock is still live.
    fn try_acquire_poll_lock(&self, ttl: Duration) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Releases only this process's acquisition; a lock that expired and was
    /// re-acquired elsewhere is left alone.
    fn release_poll_lock(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    fn mark_activity(&self, now: f64, ttl: Duration) -> BoxFuture<'_, Result<(), StoreError>>;

    fn last_activity(&self) -> BoxFuture<'_, Result<Option<f64>, StoreError>>;

    fn request_force_poll(&self, ttl: Duration) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Consumes the flag: at most one loop iteration observes each request.
    fn take_force_poll(&self) -> BoxFuture<'_, Result<bool, StoreError>>;
}
