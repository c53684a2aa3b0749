use thiserror::Error;

/// Errors surfaced by the Drive API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api returned {status}: {message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("authentication failure: {0}")]
    Auth(String),

    #[error("local i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed api response: {0}")]
    Malformed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ApiError {
    /// True when the API reported the target resource as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. } if *status == reqwest::StatusCode::NOT_FOUND
        )
    }
}
