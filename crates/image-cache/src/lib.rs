//! Kentik Image Cache
//!
//! Accepts chart queries, hands back an identifier immediately and renders
//! the chart in the background through the Kentik API. Results (images or
//! upstream errors) are kept on disk until they expire.

pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod janitor;
pub mod server;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use engine::{CacheEngine, EngineSettings};
pub use error::{CacheError, Result};
pub use fetcher::{FetchPolicy, Fetcher};
pub use janitor::Janitor;
pub use server::{create_router, start_server, ServerState, SharedState};
pub use types::{ArtifactResult, RecoveryReport};
