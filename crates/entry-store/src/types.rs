//! Cache entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome state of an entry's upstream fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Pending,
    Active,
    Failed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Active => "active",
            EntryState::Failed => "failed",
        }
    }
}

/// Status and message reported by upstream for a failed render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamFailure {
    pub status: u16,
    pub message: String,
}

/// State-specific data carried by an entry.
///
/// Exactly one kind of payload exists per state, so the query of a pending
/// entry is dropped the moment it becomes active or failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The original request, kept so a restart can resume the fetch
    Query(serde_json::Value),
    /// The rendered artifact
    Artifact { content_type: String, data: Vec<u8> },
    /// The upstream failure
    Error(UpstreamFailure),
}

impl Payload {
    pub fn state(&self) -> EntryState {
        match self {
            Payload::Query(_) => EntryState::Pending,
            Payload::Artifact { .. } => EntryState::Active,
            Payload::Error(_) => EntryState::Failed,
        }
    }
}

/// A cached rendering request and its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub payload: Payload,
}

impl CacheEntry {
    /// A freshly submitted entry awaiting its fetch
    pub fn pending(
        id: String,
        query: serde_json::Value,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            created_at,
            expires_at,
            payload: Payload::Query(query),
        }
    }

    pub fn state(&self) -> EntryState {
        self.payload.state()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Same entry, new payload. Identity and timestamps never change.
    pub fn with_payload(&self, payload: Payload) -> Self {
        Self {
            id: self.id.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            payload,
        }
    }

    pub fn summary(&self) -> EntrySummary {
        let (content_type, size, error) = match &self.payload {
            Payload::Query(_) => (None, 0, None),
            Payload::Artifact { content_type, data } => {
                (Some(content_type.clone()), data.len() as u64, None)
            }
            Payload::Error(failure) => (None, 0, Some(failure.clone())),
        };

        EntrySummary {
            id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            content_type,
            size,
            error,
        }
    }
}

/// In-memory view of an entry: everything except the artifact bytes and
/// the pending query, which stay on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: String,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UpstreamFailure>,
}

impl EntrySummary {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub pending: usize,
    pub active: usize,
    pub failed: usize,
}
