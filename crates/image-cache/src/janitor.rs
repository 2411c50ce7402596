//! Periodic removal of expired entries

use crate::engine::CacheEngine;
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub struct Janitor {
    engine: CacheEngine,
    period: Duration,
}

impl Janitor {
    pub fn new(engine: CacheEngine, period: Duration) -> Self {
        Self { engine, period }
    }

    /// Evict every entry that has expired, whatever its state.
    /// Returns the number of entries removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for summary in self.engine.entries().await {
            if summary.is_expired_at(now) && self.engine.evict_if_expired(&summary.id, now).await {
                debug!(id = %summary.id, state = summary.state.as_str(), "Evicted expired entry");
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Cache maintenance complete");
        }
        removed
    }

    /// Run [`Janitor::sweep`] every period until the runtime shuts down.
    /// The first sweep happens one period after start.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}
