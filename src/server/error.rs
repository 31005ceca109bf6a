use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Client-visible failures. Everything else the server absorbs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("API key is malformed")]
    InvalidKeyFormat,

    #[error("API key is not recognized")]
    InvalidApiKey,

    #[error("Account is inactive")]
    InactiveAccount,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidKeyFormat | ApiError::InvalidApiKey | ApiError::InactiveAccount => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::InvalidKeyFormat => "INVALID_API_KEY_FORMAT",
            ApiError::InvalidApiKey => "INVALID_API_KEY",
            ApiError::InactiveAccount => "INACTIVE_ACCOUNT",
            ApiError::Internal => "PROCESSING_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_401() {
        assert_eq!(ApiError::InvalidKeyFormat.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InvalidApiKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InactiveAccount.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn codes_are_distinct() {
        let codes = [
            ApiError::InvalidRequest("x".to_string()).code(),
            ApiError::InvalidKeyFormat.code(),
            ApiError::InvalidApiKey.code(),
            ApiError::InactiveAccount.code(),
            ApiError::Internal.code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
