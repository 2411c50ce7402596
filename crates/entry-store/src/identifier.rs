//! Content-addressed, expiry-qualified entry identifiers
//!
//! An identifier is `hex(sha256(canonical(query))) + "_" + expiry`, where the
//! expiry is rendered as Unix seconds with a six-digit microsecond fraction.
//! Two submissions share an identifier only when both the query and the
//! computed expiry instant are identical.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

const HASH_HEX_LEN: usize = 64;

/// Derive the identifier for a query expiring at `expires_at`
pub fn identifier(query: &Value, expires_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(query));
    format!(
        "{}_{}",
        hex::encode(hasher.finalize()),
        format_expiry(expires_at)
    )
}

/// Recover the expiry instant encoded in an identifier.
///
/// Returns `None` when the identifier was not produced by [`identifier`].
pub fn parse_expiry(id: &str) -> Option<DateTime<Utc>> {
    let (hash, expiry) = id.split_once('_')?;
    if hash.len() != HASH_HEX_LEN || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let (secs, frac) = match expiry.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (expiry, ""),
    };
    if secs.is_empty() || frac.len() > 6 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = if frac.is_empty() {
        0
    } else {
        format!("{:0<6}", frac).parse().ok()?
    };
    DateTime::from_timestamp(secs, micros * 1_000)
}

fn format_expiry(ts: DateTime<Utc>) -> String {
    format!("{}.{:06}", ts.timestamp(), ts.timestamp_subsec_micros())
}

/// Deterministic serialization: compact JSON with object keys sorted at
/// every depth. Array order is significant and kept.
fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json(key, out);
                out.push(b':');
                write_canonical(field, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => write_json(scalar, out),
    }
}

fn write_json<T: serde::Serialize + ?Sized>(value: &T, out: &mut Vec<u8>) {
    // Strings and scalar values always serialize.
    if let Ok(bytes) = serde_json::to_vec(value) {
        out.extend_from_slice(&bytes);
    }
}
