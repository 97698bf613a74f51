use thiserror::Error;

/// Errors returned by the profile API collaborator.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The bearer token was rejected; the broker should drop it.
    #[error("Unauthorized (HTTP 401)")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected HTTP status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiError {
    /// Worth retrying on the next cycle without operator involvement.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Parse(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Unauthorized | Self::NotFound(_) => false,
        }
    }
}
