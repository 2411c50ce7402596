//! Durable storage for rendered-artifact cache entries
//!
//! Entries are keyed by an identifier derived from the request payload and
//! its expiry instant. Each entry is persisted as a single record on the
//! local filesystem and mirrored in an in-memory index for fast lookup.

pub mod error;
pub mod identifier;
mod record;
mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use identifier::{identifier, parse_expiry};
pub use store::EntryStore;
pub use types::{CacheEntry, CacheStats, EntryState, EntrySummary, Payload, UpstreamFailure};
