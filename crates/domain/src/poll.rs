//! The adaptive poll loop. One instance runs per process; the shared store's
//! lock key guarantees that at most one process talks to the device per tick
//! cluster-wide, whichever worker's clock fires first.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::decode;
use crate::policy::PollPolicy;
use crate::ports::device::DeviceClient;
use crate::ports::store::TelemetryStore;
use crate::reading::{now_epoch_secs, CachedSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Lock acquired, device fetched, snapshot written.
    Polled { idle: bool },
    /// Lock acquired but the fetch (or the snapshot write) failed.
    PollFailed { idle: bool },
    /// Another process holds the lock; this turn is skipped, not an error.
    LockHeld { idle: bool },
    /// The store itself misbehaved; counts as a failed iteration.
    StoreUnavailable { idle: bool },
}

impl PollOutcome {
    pub fn idle(&self) -> bool {
        match self {
            PollOutcome::Polled { idle }
            | PollOutcome::PollFailed { idle }
            | PollOutcome::LockHeld { idle }
            | PollOutcome::StoreUnavailable { idle } => *idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Polled { .. } => "polled",
            PollOutcome::PollFailed { .. } => "poll_failed",
            PollOutcome::LockHeld { .. } => "lock_held",
            PollOutcome::StoreUnavailable { .. } => "store_unavailable",
        }
    }
}

type Observer = Arc<dyn Fn(&PollOutcome) + Send + Sync>;

pub struct Poller {
    store: Arc<dyn TelemetryStore>,
    device: Arc<dyn DeviceClient>,
    policy: PollPolicy,
    consecutive_failures: u32,
    observer: Option<Observer>,
}

impl Poller {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        device: Arc<dyn DeviceClient>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            store,
            device,
            policy,
            consecutive_failures: 0,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// One iteration of the loop: consume the force flag, classify demand,
    /// and attempt the speculative lock acquisition that is the only
    /// admission point to device contact. Active and idle cadences both
    /// fetch on their turn; the consumed flag marks this tick as
    /// demand-driven.
    pub async fn tick(&mut self) -> PollOutcome {
        let forced = match self.store.take_force_poll().await {
            Ok(forced) => forced,
            Err(err) => {
                warn!(error = %err, "failed to read force-poll flag");
                false
            }
        };

        let last_activity = match self.store.last_activity().await {
            Ok(last) => last,
            Err(err) => {
                warn!(error = %err, "failed to read activity marker");
                None
            }
        };
        let idle = self.policy.is_idle(now_epoch_secs(), last_activity);
        if forced {
            debug!(idle, "force-poll flag consumed");
        }

        let acquired = match self.store.try_acquire_poll_lock(self.policy.lock_ttl).await {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(error = %err, "poll lock acquisition failed against the store");
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                return PollOutcome::StoreUnavailable { idle };
            }
        };
        if !acquired {
            debug!("poll lock held elsewhere; skipping this turn");
            return PollOutcome::LockHeld { idle };
        }

        let outcome = match self.fetch_and_store(idle).await {
            Ok(outcome) => outcome,
            Err(outcome) => outcome,
        };

        // Release on every exit path; a missed release self-heals after the
        // lock TTL but costs up to that long in polling outage.
        if let Err(err) = self.store.release_poll_lock().await {
            warn!(error = %err, "failed to release poll lock; it will expire on its own");
        }

        outcome
    }

    async fn fetch_and_store(&mut self, idle: bool) -> Result<PollOutcome, PollOutcome> {
        let raw = match self.device.fetch_snapshot().await {
            Ok(raw) => raw,
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    error = %err,
                    consecutive_failures = self.consecutive_failures,
                    "device fetch failed"
                );
                return Err(PollOutcome::PollFailed { idle });
            }
        };

        let snapshot = CachedSnapshot {
            data: decode::decode(&raw),
            timestamp: now_epoch_secs(),
        };
        if let Err(err) = self.store.put_snapshot(&snapshot).await {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            warn!(error = %err, "failed to write snapshot to the store");
            return Err(PollOutcome::PollFailed { idle });
        }

        self.consecutive_failures = 0;
        debug!(timestamp = snapshot.timestamp, "snapshot cached");
        Ok(PollOutcome::Polled { idle })
    }

    /// Loop until `shutdown` resolves. Sleeps are chosen per iteration:
    /// backoff under failure, otherwise the idle/active cadence.
    pub async fn run(mut self, shutdown: impl Future<Output = ()> + Send) {
        info!("poll loop starting");
        tokio::pin!(shutdown);
        loop {
            let outcome = self.tick().await;
            if let Some(observer) = &self.observer {
                observer(&outcome);
            }
            let delay = self.policy.sleep_after(self.consecutive_failures, outcome.idle());
            tokio::select! {
                _ = &mut shutdown => {
                    info!("poll loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
