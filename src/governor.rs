//! Per-host politeness governor (spec §4.4): enforces
//! `max(requestDelayMs, crawlDelay*1000)` between consecutive request
//! *starts*, cancellably.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of [`HostGovernor::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorOutcome {
    Proceed,
    Cancelled,
}

#[derive(Debug)]
struct HostState {
    next_allowed_at: Instant,
    in_flight: usize,
}

/// Per-host rate limiter. One instance is shared by the whole engine; each
/// host gets its own lazily-created entry (spec §3 `HostState`).
pub struct HostGovernor {
    hosts: Mutex<HashMap<String, HostState>>,
    default_delay: Duration,
}

impl HostGovernor {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            default_delay,
        }
    }

    /// Suspend the caller until `now >= nextAllowedAt(host)`, then reserve
    /// the next slot. `crawl_delay`, if present (from `robots.txt`), takes
    /// precedence over the configured default when it is the larger of the
    /// two (spec §4.4).
    pub async fn acquire(
        &self,
        host: &str,
        crawl_delay: Option<Duration>,
        cancel: &CancellationToken,
    ) -> GovernorOutcome {
        let delay = crawl_delay.unwrap_or(Duration::ZERO).max(self.default_delay);

        loop {
            let wait = {
                let mut hosts = self.hosts.lock().await;
                let now = Instant::now();
                let entry = hosts.entry(host.to_string()).or_insert(HostState {
                    next_allowed_at: now,
                    in_flight: 0,
                });
                if now >= entry.next_allowed_at {
                    entry.next_allowed_at = now + delay;
                    entry.in_flight += 1;
                    None
                } else {
                    Some(entry.next_allowed_at - now)
                }
            };

            match wait {
                None => return GovernorOutcome::Proceed,
                Some(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => continue,
                        _ = cancel.cancelled() => return GovernorOutcome::Cancelled,
                    }
                }
            }
        }
    }

    /// Release the in-flight slot reserved by `acquire`. Does not affect
    /// `next_allowed_at`; that is the politeness clock, independent of
    /// whether the fetch itself has finished.
    pub async fn release(&self, host: &str) {
        if let Some(state) = self.hosts.lock().await.get_mut(host) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    pub async fn in_flight(&self, host: &str) -> usize {
        self.hosts
            .lock()
            .await
            .get(host)
            .map(|s| s.in_flight)
            .unwrap_or(0)
    }

    pub async fn distinct_active_hosts(&self) -> usize {
        self.hosts
            .lock()
            .await
            .values()
            .filter(|s| s.in_flight > 0)
            .count()
    }
}
