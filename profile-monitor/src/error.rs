//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::api::ApiError;
use crate::credentials::CredentialError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Network call '{operation}' exceeded its {timeout_secs}s deadline")]
    NetworkTimeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    #[error("Monitored profile not found: {0}")]
    EntityNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error while {op} ({path}): {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Auth failure for the active backend that needs operator attention.
    pub fn is_auth_fatal(&self) -> bool {
        match self {
            Self::Credential(e) => e.requires_relogin(),
            _ => false,
        }
    }

    /// Whether the loop may simply try again on the next cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Credential(e) => !e.requires_relogin(),
            Self::Api(e) => e.is_transient() || matches!(e, ApiError::Unauthorized),
            Self::NetworkTimeout { .. } => true,
            Self::EntityNotFound(_) => true,
            Self::Io(_) | Self::IoPath { .. } => true,
            Self::Configuration(_) | Self::Serialization(_) | Self::Other(_) => false,
        }
    }
}
