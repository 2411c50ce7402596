//! On-disk record codec
//!
//! A record is one line of JSON header followed by the raw artifact bytes
//! (active entries only). Keeping the artifact outside the JSON avoids
//! re-encoding image data.

use crate::error::{Result, StoreError};
use crate::types::{CacheEntry, EntryState, Payload, UpstreamFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    id: String,
    state: EntryState,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    query: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<UpstreamFailure>,
}

pub(crate) fn encode(entry: &CacheEntry) -> Result<Vec<u8>> {
    let mut header = RecordHeader {
        id: entry.id.clone(),
        state: entry.state(),
        created_at: entry.created_at,
        expires_at: entry.expires_at,
        query: None,
        content_type: None,
        error: None,
    };
    let mut body: &[u8] = &[];
    match &entry.payload {
        Payload::Query(query) => header.query = Some(query.clone()),
        Payload::Artifact { content_type, data } => {
            header.content_type = Some(content_type.clone());
            body = data.as_slice();
        }
        Payload::Error(failure) => header.error = Some(failure.clone()),
    }

    // serde_json never emits a raw newline, so the header stays on one line.
    let mut out = serde_json::to_vec(&header)?;
    out.reserve(body.len() + 1);
    out.push(b'\n');
    out.extend_from_slice(body);
    Ok(out)
}

pub(crate) fn decode(raw: &[u8]) -> Result<CacheEntry> {
    let split = raw
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| StoreError::Corrupt("missing header terminator".to_string()))?;
    let header: RecordHeader = serde_json::from_slice(&raw[..split])?;
    let body = &raw[split + 1..];

    let payload = match (header.state, header.query, header.content_type, header.error) {
        (EntryState::Pending, Some(query), None, None) if body.is_empty() => {
            Payload::Query(query)
        }
        (EntryState::Active, None, Some(content_type), None) => Payload::Artifact {
            content_type,
            data: body.to_vec(),
        },
        (EntryState::Failed, None, None, Some(failure)) if body.is_empty() => {
            Payload::Error(failure)
        }
        (state, ..) => {
            return Err(StoreError::Corrupt(format!(
                "{}: fields do not match state {}",
                header.id,
                state.as_str()
            )))
        }
    };

    Ok(CacheEntry {
        id: header.id,
        created_at: header.created_at,
        expires_at: header.expires_at,
        payload,
    })
}
