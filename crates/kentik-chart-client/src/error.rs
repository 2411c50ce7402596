//! Error types for the Kentik chart client

use std::fmt;

/// Failure of a single render call.
///
/// Transient failures (timeouts, connection problems, 429 and 5xx
/// responses) are worth retrying; permanent ones are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    Transient { status: u16, message: String },
    Permanent { status: u16, message: String },
}

impl RenderError {
    pub fn transient(status: u16, message: impl Into<String>) -> Self {
        RenderError::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: u16, message: impl Into<String>) -> Self {
        RenderError::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::Transient { .. })
    }

    pub fn status(&self) -> u16 {
        match self {
            RenderError::Transient { status, .. } | RenderError::Permanent { status, .. } => *status,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RenderError::Transient { message, .. } | RenderError::Permanent { message, .. } => {
                message
            }
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Transient { status, message } => {
                write!(f, "Transient render error ({}): {}", status, message)
            }
            RenderError::Permanent { status, message } => {
                write!(f, "Render error ({}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for RenderError {}

/// Errors building a client
#[derive(Debug)]
pub enum ClientError {
    InvalidUrl(String),
    Http(Box<reqwest::Error>),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::InvalidUrl(msg) => write!(f, "Invalid API URL: {}", msg),
            ClientError::Http(err) => write!(f, "HTTP client error: {}", err),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
