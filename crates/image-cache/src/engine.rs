//! Cache engine: entry lifecycle, single-flight submission and waiting
//!
//! Every entry moves `Pending -> Active` or `Pending -> Failed` exactly once
//! and is removed only after it expires. All store mutations go through a
//! single writer lock, which makes the existence check in `submit` atomic
//! with entry creation and keeps eviction from interleaving with a
//! completion for the same id. Readers never take the writer lock.

use crate::error::{CacheError, Result};
use crate::fetcher::Fetcher;
use crate::types::{ArtifactResult, RecoveryReport};
use chrono::{DateTime, SubsecRound, Utc};
use entry_store::{
    identifier, CacheEntry, CacheStats, EntryState, EntryStore, EntrySummary, Payload,
    UpstreamFailure,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

/// Status recorded when an outcome could not be persisted
const INTERNAL_ERROR_STATUS: u16 = 500;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// TTL applied when a submission does not carry one
    pub default_ttl: Duration,
    /// Longest a waiting `get` sleeps before re-checking on its own
    pub poll_interval: Duration,
    /// Upper bound on concurrently running upstream fetches
    pub max_concurrent_fetches: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            poll_interval: Duration::from_secs(3),
            max_concurrent_fetches: 8,
        }
    }
}

/// Handle to the cache engine. Cheap to clone.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: EntryStore,
    fetcher: Fetcher,
    settings: EngineSettings,
    writer: tokio::sync::Mutex<()>,
    /// Signalled whenever a pending entry settles
    settled: Notify,
    /// Ids with an outstanding fetch
    in_flight: Mutex<HashSet<String>>,
    fetch_permits: Semaphore,
}

impl CacheEngine {
    pub fn new(store: EntryStore, fetcher: Fetcher, settings: EngineSettings) -> Self {
        let permits = settings.max_concurrent_fetches.max(1);
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                settings,
                writer: tokio::sync::Mutex::new(()),
                settled: Notify::new(),
                in_flight: Mutex::new(HashSet::new()),
                fetch_permits: Semaphore::new(permits),
            }),
        }
    }

    /// Register a query for rendering and return its identifier.
    ///
    /// Returns without waiting for upstream. If the identifier is already
    /// known nothing else happens; otherwise a pending entry is persisted and
    /// one background fetch is started for it.
    pub async fn submit(&self, query: serde_json::Value, ttl: Option<Duration>) -> Result<String> {
        self.submit_at(query, ttl, Utc::now()).await
    }

    /// [`CacheEngine::submit`] with an explicit submission instant
    pub async fn submit_at(
        &self,
        query: serde_json::Value,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        if query.is_null() {
            return Err(CacheError::InvalidRequest(
                "Incomplete request, missing 'api_query'".to_string(),
            ));
        }

        let ttl = ttl.unwrap_or(self.inner.settings.default_ttl);
        if ttl.is_zero() {
            return Err(CacheError::InvalidRequest(
                "ttl must be a positive number of seconds".to_string(),
            ));
        }
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| CacheError::InvalidRequest("ttl is out of range".to_string()))?
            // The identifier carries microseconds; keep the stored instant identical.
            .trunc_subsecs(6);
        let id = identifier(&query, expires_at);

        {
            let _writer = self.inner.writer.lock().await;
            // An existing entry cannot be expired: its expiry is in the id and
            // lies after `now`.
            if let Some(existing) = self.inner.store.summary(&id).await {
                info!(id = %id, state = existing.state.as_str(), "Entry already exists");
                return Ok(id);
            }

            let entry = CacheEntry::pending(id.clone(), query.clone(), now, expires_at);
            self.inner.store.put(&entry).await?;
        }

        info!(id = %id, ttl_secs = ttl.as_secs(), "New entry");
        self.spawn_fetch(id.clone(), query);
        Ok(id)
    }

    /// Look up an entry, waiting up to `wait` while it is pending.
    ///
    /// The wait wakes as soon as any entry settles and re-checks at least
    /// every poll interval. Giving up does not cancel the fetch.
    pub async fn get(&self, id: &str, wait: Duration) -> ArtifactResult {
        // None: the wait outlasts anything an Instant can represent
        let deadline = Instant::now().checked_add(wait);

        loop {
            // Register before checking so a completion in between still wakes us.
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            let Some(summary) = self.inner.store.summary(id).await else {
                return ArtifactResult::NotFound;
            };
            let now = Utc::now();
            if summary.is_expired_at(now) {
                debug!(id, "Entry expired");
                self.evict_if_expired(id, now).await;
                return ArtifactResult::NotFound;
            }
            if summary.state != EntryState::Pending {
                return self.load(id).await;
            }

            let remaining = deadline
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::MAX);
            if remaining.is_zero() {
                debug!(id, "Still pending");
                return ArtifactResult::StillPending;
            }
            let until_expiry = (summary.expires_at - now).to_std().unwrap_or_default();
            let nap = remaining
                .min(self.inner.settings.poll_interval)
                .min(until_expiry);
            let _ = tokio::time::timeout(nap, settled).await;
        }
    }

    async fn load(&self, id: &str) -> ArtifactResult {
        match self.inner.store.get(id).await {
            Ok(Some(entry)) => match entry.payload {
                Payload::Artifact { content_type, data } => {
                    ArtifactResult::Success { content_type, data }
                }
                Payload::Error(failure) => ArtifactResult::UpstreamError {
                    status: failure.status,
                    message: failure.message,
                },
                Payload::Query(_) => ArtifactResult::StillPending,
            },
            Ok(None) => ArtifactResult::NotFound,
            Err(e) => {
                error!(id, error = %e, "Failed to read entry");
                ArtifactResult::Unavailable(e.to_string())
            }
        }
    }

    /// Record a successful render. Only a pending entry is updated.
    ///
    /// If the artifact cannot be stored the entry is marked failed with an
    /// internal error instead of staying pending forever.
    pub async fn complete(&self, id: &str, content_type: String, data: Vec<u8>) {
        {
            let _writer = self.inner.writer.lock().await;
            let Some(current) = self.pending_entry(id).await else {
                return;
            };

            let active = current.with_payload(Payload::Artifact { content_type, data });
            match self.inner.store.put(&active).await {
                Ok(()) => info!(id, "Entry active"),
                Err(e) => {
                    error!(id, error = %e, "Failed to store artifact");
                    let failed = current.with_payload(Payload::Error(UpstreamFailure {
                        status: INTERNAL_ERROR_STATUS,
                        message: format!("Internal error: failed to store artifact: {}", e),
                    }));
                    self.persist_failure(&failed).await;
                }
            }
        }
        self.inner.settled.notify_waiters();
    }

    /// Record an upstream failure. Only a pending entry is updated.
    pub async fn fail(&self, id: &str, status: u16, message: String) {
        {
            let _writer = self.inner.writer.lock().await;
            let Some(current) = self.pending_entry(id).await else {
                return;
            };

            let failed = current.with_payload(Payload::Error(UpstreamFailure { status, message }));
            self.persist_failure(&failed).await;
            info!(id, status, "Entry failed");
        }
        self.inner.settled.notify_waiters();
    }

    /// Writer lock must be held.
    async fn pending_entry(&self, id: &str) -> Option<CacheEntry> {
        match self.inner.store.summary(id).await {
            None => {
                debug!(id, "Outcome for unknown entry ignored");
                None
            }
            Some(summary) if summary.state != EntryState::Pending => {
                warn!(id, state = summary.state.as_str(), "Outcome for settled entry ignored");
                None
            }
            Some(summary) => Some(CacheEntry {
                id: summary.id,
                created_at: summary.created_at,
                expires_at: summary.expires_at,
                // Replaced by the caller before anything is written
                payload: Payload::Query(serde_json::Value::Null),
            }),
        }
    }

    /// Writer lock must be held.
    async fn persist_failure(&self, failed: &CacheEntry) {
        if let Err(e) = self.inner.store.put(failed).await {
            error!(id = %failed.id, error = %e, "Failed to store failure, keeping it in memory");
            self.inner.store.put_in_memory(failed).await;
        }
    }

    /// Start the background fetch for `id` unless one is already running.
    /// Returns whether a fetch was started.
    fn spawn_fetch(&self, id: String, query: serde_json::Value) -> bool {
        {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(id.clone()) {
                debug!(id = %id, "Fetch already in flight");
                return false;
            }
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = match engine.inner.fetch_permits.acquire().await {
                Ok(_permit) => engine.inner.fetcher.fetch(&id, &query).await,
                Err(_) => Err(kentik_chart_client::RenderError::permanent(
                    INTERNAL_ERROR_STATUS,
                    "Fetch queue closed",
                )),
            };

            match outcome {
                Ok(chart) => engine.complete(&id, chart.content_type, chart.data).await,
                Err(e) => {
                    engine
                        .fail(&id, e.status(), e.message().to_string())
                        .await
                }
            }

            engine
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });
        true
    }

    /// Rebuild the index from disk, drop expired entries and resume the
    /// fetch of every pending one. Run before serving requests.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let now = Utc::now();
        let mut report = RecoveryReport::default();
        let mut resume = Vec::new();

        {
            let _writer = self.inner.writer.lock().await;
            for entry in self.inner.store.list().await? {
                if entry.is_expired_at(now) {
                    match self.inner.store.delete(&entry.id).await {
                        Ok(_) => report.expired += 1,
                        Err(e) => warn!(id = %entry.id, error = %e, "Failed to delete expired entry"),
                    }
                    continue;
                }
                match entry.payload {
                    Payload::Query(query) => resume.push((entry.id, query)),
                    Payload::Artifact { .. } => report.active += 1,
                    Payload::Error(_) => report.failed += 1,
                }
            }
        }

        for (id, query) in resume {
            if self.spawn_fetch(id.clone(), query) {
                info!(id = %id, "Resuming pending entry");
                report.resumed += 1;
            }
        }

        info!(
            resumed = report.resumed,
            active = report.active,
            failed = report.failed,
            expired = report.expired,
            "Recovery complete"
        );
        Ok(report)
    }

    /// Delete `id` if it has expired by `now`. Returns whether it was removed.
    pub async fn evict_if_expired(&self, id: &str, now: DateTime<Utc>) -> bool {
        let _writer = self.inner.writer.lock().await;
        match self.inner.store.summary(id).await {
            Some(summary) if summary.is_expired_at(now) => {
                match self.inner.store.delete(id).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        warn!(id, error = %e, "Failed to evict entry");
                        false
                    }
                }
            }
            _ => false,
        }
    }

    /// Summaries of all known entries
    pub async fn entries(&self) -> Vec<EntrySummary> {
        self.inner.store.summaries().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.store.stats().await
    }

    /// Number of fetches currently outstanding
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
