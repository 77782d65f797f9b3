use reqwest::StatusCode;
use thiserror::Error;

use super::refresh::RefreshFailure;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Token expired and could not be refreshed; the user must log in again
    #[error("Session expired - please log in again ({0})")]
    SessionExpired(#[source] RefreshFailure),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Access token cannot be sent as a header")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(truncated),
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::Rejected {
                status,
                body: truncated,
            },
        }
    }

    /// HTTP status behind this error, when the server answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            ApiError::AccessDenied(_) => Some(StatusCode::FORBIDDEN),
            ApiError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            ApiError::RateLimited => Some(StatusCode::TOO_MANY_REQUESTS),
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            ApiError::ServerError(_)
            | ApiError::SessionExpired(_)
            | ApiError::InvalidResponse(_)
            | ApiError::InvalidToken(_) => None,
        }
    }

    /// Whether the caller should drop its state and send the user to login
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::SessionExpired(_))
    }
}
