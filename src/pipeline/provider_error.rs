use thiserror::Error;

/// Errors from external collaborators (understanding, search, analysis).
///
/// None of these ever reach a client: every pipeline stage absorbs them
/// under its degrade-don't-abort policy and reflects them only as a lower
/// confidence plus a failed processing step.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Request timeout")]
    Timeout,
}

impl ProviderError {
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Connection(e.to_string())
        }
    }
}
