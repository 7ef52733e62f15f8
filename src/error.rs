//! Unified error types for chaser-pom

use std::sync::Arc;
use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for chaser-pom
///
/// `Clone` so a single construction failure can be handed to every caller
/// waiting on the same cache key.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Unknown frame identifier, checkpoint or cache key
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not valid in the current state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Page-object constructor, initializer or readiness hook failed
    #[error("Construction failed for {key}: {cause}")]
    Construction {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    /// Resolved frame is no longer attached to its page
    #[error("Detached resource: {0}")]
    DetachedResource(String),

    /// Capability collaborator errors
    #[error("Capability error: {0}")]
    Capability(String),

    /// Timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Error::NotFound(what.into())
    }

    /// Create a new illegal state error
    pub fn illegal_state<S: Into<String>>(msg: S) -> Self {
        Error::IllegalState(msg.into())
    }

    /// Wrap the cause of a failed page-object construction
    pub fn construction<K, E>(key: K, cause: E) -> Self
    where
        K: ToString,
        E: Into<anyhow::Error>,
    {
        Error::Construction {
            key: key.to_string(),
            cause: Arc::new(cause.into()),
        }
    }

    /// Create a new detached resource error
    pub fn detached<S: Into<String>>(what: S) -> Self {
        Error::DetachedResource(what.into())
    }

    /// Create a new capability error
    pub fn capability<S: Into<String>>(msg: S) -> Self {
        Error::Capability(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// True for lookups that resolved to nothing, including targets that
    /// resolved but have since detached.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::DetachedResource(_))
    }

    /// The original cause of a construction failure, if this is one
    pub fn construction_cause(&self) -> Option<&anyhow::Error> {
        match self {
            Error::Construction { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::internal(format!("Lock error: {}", err))
    }
}
