use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::store::{StoreError, TelemetryStore};
use crate::ports::BoxFuture;
use crate::reading::CachedSnapshot;

#[derive(Debug, Default)]
struct Shared {
    snapshot: Option<CachedSnapshot>,
    lock: Option<(u64, Instant)>,
    activity: Option<(f64, Instant)>,
    force_poll: Option<Instant>,
    next_lock_token: u64,
}

/// In-memory stand-in for the shared store. Expiries use the tokio clock so
/// paused-time tests behave like real TTLs. Each clone shares the backing
/// state but carries its own lock token, mimicking separate worker processes
/// against one store.
#[derive(Default)]
pub struct InMemoryTelemetryStore {
    shared: Arc<Mutex<Shared>>,
    held_token: Mutex<Option<u64>>,
}

impl Clone for InMemoryTelemetryStore {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            held_token: Mutex::new(None),
        }
    }
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: true while the force-poll flag is set and unexpired.
    pub async fn force_poll_pending(&self) -> bool {
        let shared = self.shared.lock().await;
        matches!(shared.force_poll, Some(expiry) if Instant::now() < expiry)
    }
}

impl TelemetryStore for InMemoryTelemetryStore {
    fn get_snapshot(&self) -> BoxFuture<'_, Result<Option<CachedSnapshot>, StoreError>> {
        Box::pin(async move { Ok(self.shared.lock().await.snapshot.clone()) })
    }

    fn put_snapshot(&self, snapshot: &CachedSnapshot) -> BoxFuture<'_, Result<(), StoreError>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            self.shared.lock().await.snapshot = Some(snapshot);
            Ok(())
        })
    }

    fn try_acquire_poll_lock(&self, ttl: Duration) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut shared = self.shared.lock().await;
            let now = Instant::now();
            if matches!(shared.lock, Some((_, expiry)) if now < expiry) {
                return Ok(false);
            }
            let token = shared.next_lock_token;
            shared.next_lock_token += 1;
            shared.lock = Some((token, now + ttl));
            *self.held_token.lock().await = Some(token);
            Ok(true)
        })
    }

    fn release_poll_lock(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let held = self.held_token.lock().await.take();
            if let Some(held) = held {
                let mut shared = self.shared.lock().await;
                if matches!(shared.lock, Some((current, _)) if current == held) {
                    shared.lock = None;
                }
            }
            Ok(())
        })
    }

    fn mark_activity(&self, now: f64, ttl: Duration) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.shared.lock().await.activity = Some((now, Instant::now() + ttl));
            Ok(())
        })
    }

    fn last_activity(&self) -> BoxFuture<'_, Result<Option<f64>, StoreError>> {
        Box::pin(async move {
            let shared = self.shared.lock().await;
            Ok(match shared.activity {
                Some((ts, expiry)) if Instant::now() < expiry => Some(ts),
                _ => None,
            })
        })
    }

    fn request_force_poll(&self, ttl: Duration) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.shared.lock().await.force_poll = Some(Instant::now() + ttl);
            Ok(())
        })
    }

    fn take_force_poll(&self) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut shared = self.shared.lock().await;
            let pending =
                matches!(shared.force_poll.take(), Some(expiry) if Instant::now() < expiry);
            Ok(pending)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn lock_is_mutually_exclusive_until_released() {
        let store = InMemoryTelemetryStore::new();
        let other = store.clone();
        assert!(store
            .try_acquire_poll_lock(Duration::from_secs(20))
            .await
            .unwrap());
        assert!(!other
            .try_acquire_poll_lock(Duration::from_secs(20))
            .await
            .unwrap());
        store.release_poll_lock().await.unwrap();
        assert!(other
            .try_acquire_poll_lock(Duration::from_secs(20))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_lock_expires_after_ttl_never_sooner() {
        let store = InMemoryTelemetryStore::new();
        let other = store.clone();
        assert!(store
            .try_acquire_poll_lock(Duration::from_secs(20))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(!other
            .try_acquire_poll_lock(Duration::from_secs(20))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(other
            .try_acquire_poll_lock(Duration::from_secs(20))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_release_does_not_free_a_reacquired_lock() {
        let crashed = InMemoryTelemetryStore::new();
        let successor = crashed.clone();
        assert!(crashed
            .try_acquire_poll_lock(Duration::from_secs(1))
            .await
            .unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(successor
            .try_acquire_poll_lock(Duration::from_secs(20))
            .await
            .unwrap());

        // The original holder wakes up late and releases; the successor's
        // lock must survive.
        crashed.release_poll_lock().await.unwrap();
        let third = crashed.clone();
        assert!(!third
            .try_acquire_poll_lock(Duration::from_secs(20))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn force_poll_flag_is_consumed_once() {
        let store = InMemoryTelemetryStore::new();
        store
            .request_force_poll(Duration::from_secs(10))
            .await
            .unwrap();
        assert!(store.take_force_poll().await.unwrap());
        assert!(!store.take_force_poll().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_force_poll_flag_reads_as_absent() {
        let store = InMemoryTelemetryStore::new();
        store
            .request_force_poll(Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.take_force_poll().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_marker_expires() {
        let store = InMemoryTelemetryStore::new();
        store
            .mark_activity(123.0, Duration::from_secs(180))
            .await
            .unwrap();
        assert_eq!(store.last_activity().await.unwrap(), Some(123.0));
        tokio::time::advance(Duration::from_secs(181)).await;
        assert_eq!(store.last_activity().await.unwrap(), None);
    }
}
