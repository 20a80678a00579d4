// Error handling module
// Defines the client error taxonomy and refresh failures

use thiserror::Error;

/// Errors returned by the authenticated client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network-level failure (connect, DNS, timeout, body)
    /// Passed through untouched on both the original and the retried attempt
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Target could not be resolved against the base URL
    #[error("Invalid request target: {0}")]
    InvalidTarget(String),

    /// Header name or value could not be encoded
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Request body could not be serialized
    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    /// Login or OAuth callback failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Non-success status from the backend (only raised by JSON helpers)
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Credential refresh failed
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Outcome of a failed refresh cycle, shared by every waiter of that cycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Token mode is configured but the store holds no refresh secret
    #[error("Refresh failed: no refresh secret available")]
    MissingSecret,

    /// Refresh endpoint unreachable
    #[error("Refresh failed: {0}")]
    Network(String),

    /// Refresh endpoint answered with a non-success status
    #[error("Refresh failed: {status} - {body}")]
    Status { status: u16, body: String },

    /// Refresh response could not be parsed or carried no credential
    #[error("Refresh response malformed: {0}")]
    Malformed(String),

    /// Session was cleared by a refresh cycle that settled earlier
    #[error("Refresh skipped: session already logged out")]
    LoggedOut,

    /// Refresh task ended without reporting a result
    #[error("Refresh aborted: {0}")]
    Aborted(String),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ClientError::AuthError("missing access_token".to_string());
        assert_eq!(err.to_string(), "Authentication failed: missing access_token");

        let err = ClientError::InvalidTarget("http://[::1".to_string());
        assert_eq!(err.to_string(), "Invalid request target: http://[::1");

        let err = ClientError::Api {
            status: 404,
            message: "member not found".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 404 - member not found");
    }

    #[test]
    fn test_refresh_error_messages() {
        let err = RefreshError::Status {
            status: 401,
            body: "expired".to_string(),
        };
        assert_eq!(err.to_string(), "Refresh failed: 401 - expired");

        let err = RefreshError::MissingSecret;
        assert_eq!(err.to_string(), "Refresh failed: no refresh secret available");

        let err = RefreshError::Malformed("empty access_token".to_string());
        assert_eq!(err.to_string(), "Refresh response malformed: empty access_token");
    }

    #[test]
    fn test_refresh_error_is_transparent() {
        let err: ClientError = RefreshError::Network("connection refused".to_string()).into();
        assert_eq!(err.to_string(), "Refresh failed: connection refused");
        assert!(matches!(err, ClientError::Refresh(RefreshError::Network(_))));
    }

    #[test]
    fn test_refresh_error_clone_eq() {
        let err = RefreshError::Status {
            status: 500,
            body: String::new(),
        };
        assert_eq!(err.clone(), err);
    }
}
