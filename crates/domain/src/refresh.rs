//! Read-side bridge between HTTP handlers and the poll loop. Readers never
//! talk to the device; they mark activity, optionally raise the force-poll
//! flag, and wait a bounded time for the loop to publish a newer snapshot.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::policy::PollPolicy;
use crate::ports::store::{StoreError, TelemetryStore};
use crate::reading::{now_epoch_secs, CachedSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// The cached snapshot was already within the freshness window.
    Fresh,
    /// A newer snapshot arrived while we waited.
    Refreshed,
    /// The wait ended (or was skipped) with only an older snapshot on hand.
    Stale,
    /// Nothing cached at all, even after waiting.
    Missing,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Refreshed => "refreshed",
            Freshness::Stale => "stale",
            Freshness::Missing => "missing",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotResult {
    pub snapshot: Option<CachedSnapshot>,
    pub freshness: Freshness,
}

#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn TelemetryStore>,
    policy: PollPolicy,
}

impl SnapshotService {
    pub fn new(store: Arc<dyn TelemetryStore>, policy: PollPolicy) -> Self {
        Self { store, policy }
    }

    /// Plain cache read with no activity or refresh side effects.
    pub async fn latest(&self) -> Result<Option<CachedSnapshot>, StoreError> {
        self.store.get_snapshot().await
    }

    /// Serves the freshest snapshot obtainable within the wait budget.
    ///
    /// Marking activity is best-effort: a reader must still get an answer
    /// when only that write fails. The initial cache read is not; with the
    /// store down there is nothing to serve.
    pub async fn fresh(&self) -> Result<SnapshotResult, StoreError> {
        let now = now_epoch_secs();
        if let Err(err) = self
            .store
            .mark_activity(now, self.policy.activity_marker_ttl())
            .await
        {
            warn!(error = %err, "failed to mark reader activity");
        }

        let initial = self.store.get_snapshot().await?;
        let baseline = initial.as_ref().map(|s| s.timestamp);

        if self.policy.is_fresh(now, baseline) {
            return Ok(SnapshotResult {
                snapshot: initial,
                freshness: Freshness::Fresh,
            });
        }

        if !self.policy.warrants_force_poll(now, baseline) {
            // Slightly stale but the active loop will overwrite it within
            // a cadence or two; not worth holding the request open.
            return Ok(SnapshotResult {
                snapshot: initial,
                freshness: Freshness::Stale,
            });
        }

        if let Err(err) = self
            .store
            .request_force_poll(self.policy.force_poll_ttl)
            .await
        {
            warn!(error = %err, "failed to raise the force-poll flag");
        }

        let deadline = tokio::time::Instant::now() + self.policy.wait_timeout;
        let mut latest = initial;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.policy.wait_granularity).await;
            match self.store.get_snapshot().await {
                Ok(Some(snapshot)) => {
                    if baseline.map_or(true, |ts| snapshot.timestamp > ts) {
                        return Ok(SnapshotResult {
                            snapshot: Some(snapshot),
                            freshness: Freshness::Refreshed,
                        });
                    }
                    latest = Some(snapshot);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "snapshot read failed while waiting for refresh");
                }
            }
        }

        debug!("refresh wait timed out; serving what is cached");
        let freshness = if latest.is_some() {
            Freshness::Stale
        } else {
            Freshness::Missing
        };
        Ok(SnapshotResult {
            snapshot: latest,
            freshness,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use std::collections::HashMap;

    use super::*;
    use crate::decode;
    use crate::memory::InMemoryTelemetryStore;
    use crate::reading::RawSnapshot;

    fn service(store: &InMemoryTelemetryStore) -> SnapshotService {
        SnapshotService::new(Arc::new(store.clone()), PollPolicy::default())
    }

    fn snapshot_aged(age_secs: f64) -> CachedSnapshot {
        CachedSnapshot {
            data: decode::decode(&RawSnapshot::new(HashMap::new())),
            timestamp: now_epoch_secs() - age_secs,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_snapshot_is_served_without_forcing() {
        let store = InMemoryTelemetryStore::new();
        store.put_snapshot(&snapshot_aged(1.0)).await.unwrap();

        let result = service(&store).fresh().await.unwrap();
        assert_eq!(result.freshness, Freshness::Fresh);
        assert!(result.snapshot.is_some());
        assert!(!store.force_poll_pending().await);
        assert!(store.last_activity().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn borderline_stale_snapshot_is_served_immediately() {
        let store = InMemoryTelemetryStore::new();
        // Past the freshness window (5s) but under the force threshold (150s).
        store.put_snapshot(&snapshot_aged(30.0)).await.unwrap();

        let result = service(&store).fresh().await.unwrap();
        assert_eq!(result.freshness, Freshness::Stale);
        assert!(result.snapshot.is_some());
        assert!(!store.force_poll_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cache_waits_for_the_first_snapshot() {
        let store = InMemoryTelemetryStore::new();
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            writer.put_snapshot(&snapshot_aged(0.0)).await.unwrap();
        });

        let result = service(&store).fresh().await.unwrap();
        assert_eq!(result.freshness, Freshness::Refreshed);
        assert!(result.snapshot.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn very_stale_snapshot_forces_and_picks_up_the_replacement() {
        let store = InMemoryTelemetryStore::new();
        let old = snapshot_aged(200.0);
        store.put_snapshot(&old).await.unwrap();

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(writer.take_force_poll().await.unwrap());
            writer.put_snapshot(&snapshot_aged(0.0)).await.unwrap();
        });

        let result = service(&store).fresh().await.unwrap();
        assert_eq!(result.freshness, Freshness::Refreshed);
        let served = result.snapshot.unwrap();
        assert!(served.timestamp > old.timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_to_stale_or_missing() {
        let empty = InMemoryTelemetryStore::new();
        let result = service(&empty).fresh().await.unwrap();
        assert_eq!(result.freshness, Freshness::Missing);
        assert!(result.snapshot.is_none());

        let stale = InMemoryTelemetryStore::new();
        stale.put_snapshot(&snapshot_aged(200.0)).await.unwrap();
        let result = service(&stale).fresh().await.unwrap();
        assert_eq!(result.freshness, Freshness::Stale);
        assert!(result.snapshot.is_some());
        // The flag was raised but nothing consumed it.
        assert!(stale.force_poll_pending().await);
    }
}
