//! Retrying upstream fetch for one entry

use kentik_chart_client::client::TIMEOUT_STATUS;
use kentik_chart_client::{Chart, RenderError, Renderer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Retry and timeout settings for upstream calls
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Attempts after the first one
    pub retries: u32,
    pub attempt_timeout: Duration,
    /// Backoff base; doubles after every transient failure
    pub retry_delay: Duration,
}

/// Runs the render call for an entry, retrying transient failures.
///
/// The fetcher only reports the outcome; recording it is up to the caller.
pub struct Fetcher {
    renderer: Arc<dyn Renderer>,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(renderer: Arc<dyn Renderer>, policy: FetchPolicy) -> Self {
        Self { renderer, policy }
    }

    /// Render `query`, making at most `retries + 1` attempts.
    ///
    /// A permanent failure ends the fetch immediately. Otherwise the last
    /// failure observed is returned once attempts run out.
    pub async fn fetch(&self, id: &str, query: &serde_json::Value) -> Result<Chart, RenderError> {
        let attempts = self.policy.retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started = std::time::Instant::now();
            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.renderer.render(query, self.policy.attempt_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RenderError::transient(TIMEOUT_STATUS, "Request timeout")),
            };

            match result {
                Ok(chart) => {
                    info!(
                        id,
                        attempt,
                        size = chart.data.len(),
                        content_type = %chart.content_type,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Fetched chart"
                    );
                    return Ok(chart);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        id,
                        attempt,
                        attempts,
                        error = %e,
                        "Transient upstream failure, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(id, attempt, status = e.status(), error = %e, "Upstream fetch failed");
                    return Err(e);
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.policy
            .retry_delay
            .checked_mul(factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}
