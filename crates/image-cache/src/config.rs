use crate::engine::EngineSettings;
use crate::error::{CacheError, Result};
use crate::fetcher::FetchPolicy;
use kentik_chart_client::KentikClient;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Slack added on top of the worst-case fetch time for the default wait ceiling
const WAIT_SLACK: Duration = Duration::from_secs(5);

/// Longest any request may be held open waiting for a render
const MAX_WAIT_CEILING: Duration = Duration::from_secs(3600);

/// Service configuration parsed from environment variables
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub api_url: String,
    pub auth_email: String,
    pub auth_token: String,
    pub retries: u32,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
    pub max_concurrent_fetches: usize,
    /// Longest a `GET /image/{id}` may wait for a pending entry
    pub wait_ceiling: Duration,
    pub poll_interval: Duration,
    pub default_ttl: Duration,
    pub cache_path: PathBuf,
    pub maintenance_period: Duration,
    pub debug: bool,
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        // Zero is never a useful period, fall back to the default
        let secs = |key: &str, default: u64| {
            Duration::from_secs(number(key).filter(|v| *v > 0).unwrap_or(default))
        };
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| CacheError::Config(format!("{} must be set", key)))
        };

        let port = lookup("PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(8080);

        let api_url = lookup("KENTIK_API_URL")
            .unwrap_or_else(|| KentikClient::DEFAULT_BASE_URL.to_string());
        let auth_email = required("KT_AUTH_EMAIL")?;
        let auth_token = required("KT_AUTH_TOKEN")?;

        let retries = number("KENTIK_API_RETRIES")
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(3);
        let attempt_timeout = secs("KENTIK_API_TIMEOUT", 60);
        let retry_delay = Duration::from_millis(
            number("KENTIK_API_RETRY_DELAY_MS")
                .filter(|v| *v > 0)
                .unwrap_or(500),
        );
        let max_concurrent_fetches = number("MAX_CONCURRENT_FETCHES")
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(8);

        let wait_ceiling = number("ENTRY_WAIT_TIMEOUT")
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| {
                attempt_timeout
                    .saturating_mul(retries.max(1))
                    .saturating_add(WAIT_SLACK)
            })
            .min(MAX_WAIT_CEILING);

        let poll_interval = secs("STATUS_POLL_PERIOD", 3);
        let default_ttl = secs("DEFAULT_TTL", 300);
        let cache_path = lookup("CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("cache"));
        let maintenance_period = secs("CACHE_MAINTENANCE_PERIOD", 60);
        let debug = lookup("DEBUG").map(|v| env_flag(&v)).unwrap_or(false);

        Ok(Self {
            port,
            api_url,
            auth_email,
            auth_token,
            retries,
            attempt_timeout,
            retry_delay,
            max_concurrent_fetches,
            wait_ceiling,
            poll_interval,
            default_ttl,
            cache_path,
            maintenance_period,
            debug,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_ttl: self.default_ttl,
            poll_interval: self.poll_interval,
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            retries: self.retries,
            attempt_timeout: self.attempt_timeout,
            retry_delay: self.retry_delay,
        }
    }

    pub fn log_summary(&self) {
        info!("Port: {}", self.port);
        info!("Kentik API: {}", self.api_url);
        info!("Kentik user: {}", self.auth_email);
        info!(
            "Upstream: {} retries, {:?} per attempt, {:?} base delay, {} concurrent",
            self.retries, self.attempt_timeout, self.retry_delay, self.max_concurrent_fetches
        );
        info!(
            "Wait ceiling: {:?}, poll period: {:?}",
            self.wait_ceiling, self.poll_interval
        );
        info!("Default TTL: {:?}", self.default_ttl);
        info!("Cache path: {:?}", self.cache_path);
        info!("Maintenance period: {:?}", self.maintenance_period);
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("api_url", &self.api_url)
            .field("auth_email", &self.auth_email)
            .field("auth_token", &"<redacted>")
            .field("retries", &self.retries)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("retry_delay", &self.retry_delay)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("wait_ceiling", &self.wait_ceiling)
            .field("poll_interval", &self.poll_interval)
            .field("default_ttl", &self.default_ttl)
            .field("cache_path", &self.cache_path)
            .field("maintenance_period", &self.maintenance_period)
            .field("debug", &self.debug)
            .finish()
    }
}

/// Interpret an environment flag such as `DEBUG`
pub fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
