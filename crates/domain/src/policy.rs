use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Cadence and freshness thresholds shared by the poll loop and the
/// refresh-on-demand path. All fields come from configuration; the defaults
/// mirror the deployed values.
#[derive(Clone, Debug)]
pub struct PollPolicy {
    /// Inter-poll sleep while readers are active.
    pub active_interval: Duration,
    /// Inter-poll sleep while idle; idle iterations only fetch when forced.
    pub idle_interval: Duration,
    /// Readers quiet for this long classify the system as idle.
    pub activity_timeout: Duration,
    /// Slack added to `active_interval` when classifying a cached snapshot
    /// as fresh.
    pub freshness_margin: Duration,
    /// Extra lifetime on the activity marker key beyond `activity_timeout`.
    pub activity_margin: Duration,
    /// Expiry on the poll lock key; bounds the outage from a crashed holder.
    pub lock_ttl: Duration,
    /// Expiry on the one-shot force-poll flag.
    pub force_poll_ttl: Duration,
    /// Longest a reader will block waiting for a newer snapshot.
    pub wait_timeout: Duration,
    /// How often the refresh bridge re-reads the store while waiting.
    pub wait_granularity: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(3),
            idle_interval: Duration::from_secs(300),
            activity_timeout: Duration::from_secs(120),
            freshness_margin: Duration::from_secs(2),
            activity_margin: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(20),
            force_poll_ttl: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(15),
            wait_granularity: Duration::from_millis(200),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PollPolicy {
    /// Missing or unparseable markers are treated as activity at time zero.
    pub fn is_idle(&self, now: f64, last_activity: Option<f64>) -> bool {
        let last = last_activity.unwrap_or(0.0);
        now - last >= self.activity_timeout.as_secs_f64()
    }

    /// Fresh iff a snapshot exists and is younger than one active poll
    /// interval plus a small margin.
    pub fn is_fresh(&self, now: f64, snapshot_timestamp: Option<f64>) -> bool {
        match snapshot_timestamp {
            Some(ts) => {
                now - ts < self.active_interval.as_secs_f64() + self.freshness_margin.as_secs_f64()
            }
            None => false,
        }
    }

    /// A stale entry only warrants a forced device fetch once it is older
    /// than half the idle interval (or missing entirely); borderline
    /// staleness is served as-is.
    pub fn warrants_force_poll(&self, now: f64, snapshot_timestamp: Option<f64>) -> bool {
        match snapshot_timestamp {
            Some(ts) => now - ts >= self.idle_interval.as_secs_f64() / 2.0,
            None => true,
        }
    }

    /// Sleep after a poll iteration: failure backoff wins over idle/active
    /// cadence.
    pub fn sleep_after(&self, consecutive_failures: u32, idle: bool) -> Duration {
        if consecutive_failures > 0 {
            self.backoff.next_delay(consecutive_failures)
        } else if idle {
            self.idle_interval
        } else {
            self.active_interval
        }
    }

    pub fn activity_marker_ttl(&self) -> Duration {
        self.activity_timeout + self.activity_margin
    }
}
