//! Error types for the entry store

use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    Io(Box<std::io::Error>),
    Codec(Box<serde_json::Error>),
    /// A record exists but does not describe a valid entry
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "IO error: {}", err),
            StoreError::Codec(err) => write!(f, "Record encoding error: {}", err),
            StoreError::Corrupt(msg) => write!(f, "Corrupt record: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err.as_ref()),
            StoreError::Codec(err) => Some(err.as_ref()),
            StoreError::Corrupt(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
