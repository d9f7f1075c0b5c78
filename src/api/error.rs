use thiserror::Error;

use crate::models::{ErrorCode, SendFailure};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server error {code}: {message}")]
    Server {
        status: u16,
        /// Server-supplied error code, passed through verbatim.
        code: String,
        message: String,
        retry_after: Option<u64>,
        upstream_code: Option<String>,
        upstream_message: Option<String>,
    },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Classify into the message-level failure attached to the offending
    /// user message. Always retryable until the user dismisses the banner.
    pub fn to_send_failure(&self) -> SendFailure {
        match self {
            ApiError::Network(err) => SendFailure {
                code: ErrorCode::Network,
                message: err.to_string(),
                retry_after: None,
                upstream_code: None,
                upstream_message: None,
                retry_available: true,
            },
            ApiError::Server {
                code,
                message,
                retry_after,
                upstream_code,
                upstream_message,
                ..
            } => SendFailure {
                code: ErrorCode::from(code.clone()),
                message: message.clone(),
                retry_after: *retry_after,
                upstream_code: upstream_code.clone(),
                upstream_message: upstream_message.clone(),
                retry_available: true,
            },
            ApiError::Decode(err) => SendFailure {
                code: ErrorCode::Unknown,
                message: err.to_string(),
                retry_after: None,
                upstream_code: None,
                upstream_message: None,
                retry_available: true,
            },
            ApiError::InvalidQuery(message) => SendFailure {
                code: ErrorCode::Server("validation_error".to_string()),
                message: message.clone(),
                retry_after: None,
                upstream_code: None,
                upstream_message: None,
                retry_available: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_code_passes_through() {
        let err = ApiError::Server {
            status: 429,
            code: "rate_limit_exceeded".to_string(),
            message: "slow down".to_string(),
            retry_after: Some(30),
            upstream_code: Some("429".to_string()),
            upstream_message: None,
        };
        let failure = err.to_send_failure();
        assert_eq!(failure.code.as_str(), "rate_limit_exceeded");
        assert_eq!(failure.retry_after, Some(30));
        assert!(failure.retry_available);
    }
}
