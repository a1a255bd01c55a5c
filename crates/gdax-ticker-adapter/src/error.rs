/*
[INPUT]:  Error sources (WebSocket transport, serialization, URL parsing, exchange replies)
[OUTPUT]: Structured error types with retry hints
[POS]:    Error handling layer - unified error type for the adapter crate
[UPDATE]: When adding new error sources or changing retry classification
*/

use std::time::Duration;

use thiserror::Error;

use crate::types::ErrorResponse;

/// Main error type for the GDAX feed adapter
#[derive(Error, Debug)]
pub enum FeedError {
    /// WebSocket handshake or transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Connect or read did not complete in time
    #[error("Timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The peer ended the stream
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// Product identifier or currency pair is not usable
    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    /// The exchange replied with an `error` message
    #[error("Server error: {message}")]
    Server { message: String },
}

impl FeedError {
    /// Check if the error is a transport fault the connection loop should retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::WebSocket(_) | FeedError::Timeout { .. } | FeedError::Closed { .. }
        )
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        FeedError::Closed {
            reason: reason.into(),
        }
    }
}

impl From<ErrorResponse> for FeedError {
    fn from(response: ErrorResponse) -> Self {
        let message = match response.reason {
            Some(reason) if !reason.is_empty() => format!("{} ({reason})", response.message),
            _ => response.message,
        };
        FeedError::Server { message }
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_err = FeedError::Timeout {
            duration: Duration::from_secs(10),
        };
        assert!(timeout_err.is_retryable());
        assert!(FeedError::closed("remote hung up").is_retryable());

        let product_err = FeedError::InvalidProduct("BTC".to_string());
        assert!(!product_err.is_retryable());

        let server_err = FeedError::Server {
            message: "Failed to subscribe".to_string(),
        };
        assert!(!server_err.is_retryable());
    }

    #[test]
    fn test_server_error_from_response() {
        let err = FeedError::from(ErrorResponse {
            message: "Failed to subscribe".to_string(),
            reason: Some("FOO-BAR is not a valid product".to_string()),
        });
        assert_eq!(
            err.to_string(),
            "Server error: Failed to subscribe (FOO-BAR is not a valid product)"
        );
        assert!(!err.is_retryable());

        let bare = FeedError::from(ErrorResponse {
            message: "Failed to subscribe".to_string(),
            reason: None,
        });
        assert_eq!(bare.to_string(), "Server error: Failed to subscribe");
    }

    #[test]
    fn test_error_display() {
        let err = FeedError::closed("stream ended");
        assert_eq!(err.to_string(), "Connection closed: stream ended");
    }
}
