//! Core types for the image cache

use chrono::{DateTime, Utc};
use entry_store::{CacheStats, EntrySummary};
use serde::{Deserialize, Serialize};

/// Outcome of looking up an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactResult {
    /// The rendered artifact
    Success { content_type: String, data: Vec<u8> },
    /// Upstream rejected the request; stored verbatim
    UpstreamError { status: u16, message: String },
    /// Still rendering when the wait ran out; retry later
    StillPending,
    /// Unknown or expired
    NotFound,
    /// The entry exists but could not be read from storage
    Unavailable(String),
}

/// What `recover()` found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Pending entries whose fetch was restarted
    pub resumed: usize,
    pub active: usize,
    pub failed: usize,
    /// Entries deleted because they had already expired
    pub expired: usize,
}

/// Body of `POST /requests`
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub api_query: Option<serde_json::Value>,
    #[serde(default)]
    pub ttl: Option<u64>,
}

/// Response of `POST /requests`
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageId {
    pub id: String,
}

/// Error body shared by all endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub loc: serde_json::Value,
    pub msg: String,
}

/// One entry of the `/info` listing
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    pub id: String,
    pub state: &'static str,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub expiration: DateTime<Utc>,
    pub remaining_secs: i64,
}

impl EntryInfo {
    pub fn from_summary(summary: &EntrySummary, now: DateTime<Utc>) -> Self {
        Self {
            id: summary.id.clone(),
            state: summary.state.as_str(),
            size: summary.size,
            content_type: summary.content_type.clone(),
            expiration: summary.expires_at,
            remaining_secs: (summary.expires_at - now).num_seconds().max(0),
        }
    }
}

/// Response of `GET /info`
#[derive(Debug, Serialize)]
pub struct CacheInfo {
    pub active_count: usize,
    pub pending_count: usize,
    pub failed_count: usize,
    pub total_bytes: u64,
    pub entries: Vec<EntryInfo>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub in_flight: usize,
    pub cache: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use entry_store::EntryState;

    #[test]
    fn test_submit_request_defaults() {
        let request: SubmitRequest = serde_json::from_str("{}").unwrap();
        assert!(request.api_query.is_none());
        assert!(request.ttl.is_none());

        let request: SubmitRequest =
            serde_json::from_str(r#"{"api_query": null, "ttl": 60}"#).unwrap();
        assert!(request.api_query.is_none());
        assert_eq!(request.ttl, Some(60));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error_type: "error".to_string(),
            loc: serde_json::json!("abc_1.0"),
            msg: "Image not found".to_string(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["loc"], "abc_1.0");
        assert_eq!(json["msg"], "Image not found");
    }

    #[test]
    fn test_entry_info_remaining_never_negative() {
        let now = Utc::now();
        let summary = EntrySummary {
            id: "abc_1.0".to_string(),
            state: EntryState::Active,
            created_at: now - Duration::seconds(600),
            expires_at: now - Duration::seconds(300),
            content_type: Some("image/png".to_string()),
            size: 10,
            error: None,
        };

        let info = EntryInfo::from_summary(&summary, now);
        assert_eq!(info.remaining_secs, 0);
        assert_eq!(info.state, "active");
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            uptime_secs: 3600,
            in_flight: 2,
            cache: CacheStats {
                entries: 100,
                total_bytes: 50_000_000,
                pending: 2,
                active: 90,
                failed: 8,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"ok\""));
        assert!(json.contains("3600"));
        assert!(json.contains("50000000"));
    }
}
