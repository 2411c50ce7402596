//! Error types for the image cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// The request was rejected before any entry was created
    InvalidRequest(String),
    Storage(entry_store::StoreError),
    Config(String),
    /// Listener or other process-level I/O failure
    Io(Box<std::io::Error>),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            CacheError::Storage(err) => write!(f, "Storage error: {}", err),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Storage(err) => Some(err),
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<entry_store::StoreError> for CacheError {
    fn from(err: entry_store::StoreError) -> Self {
        CacheError::Storage(err)
    }
}

impl From<kentik_chart_client::ClientError> for CacheError {
    fn from(err: kentik_chart_client::ClientError) -> Self {
        CacheError::Config(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for CacheError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        CacheError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
