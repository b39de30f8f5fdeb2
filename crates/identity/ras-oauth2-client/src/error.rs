//! OAuth2 error types.

use crate::flow::OAuth2Flow;
use thiserror::Error;

pub type OAuth2Result<T> = Result<T, OAuth2Error>;

/// Every failure surfaced by this crate.
///
/// The type is `Clone` because a single refresh outcome is shared between all
/// callers waiting on the same cache key.
#[derive(Debug, Clone, Error)]
pub enum OAuth2Error {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported code challenge method: {0}")]
    UnsupportedMethod(String),

    #[error("Unsupported OAuth2 flow: {0}")]
    UnsupportedFlow(OAuth2Flow),

    #[error("Authentication required for {0}")]
    AuthenticationRequired(String),

    #[error("Token exchange failed with status {status}: {error}")]
    TokenExchangeFailed {
        status: u16,
        error: String,
        description: Option<String>,
    },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Token revocation failed: {0}")]
    RevocationFailed(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Callback error: {0}")]
    CallbackError(String),

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Token storage error: {0}")]
    StorageError(String),
}

impl OAuth2Error {
    /// Only transport failures are worth retrying; OAuth2 error responses
    /// (expired code, invalid client) will not change on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OAuth2Error::TransportError(_))
    }
}

impl From<reqwest::Error> for OAuth2Error {
    fn from(err: reqwest::Error) -> Self {
        OAuth2Error::TransportError(err.to_string())
    }
}

impl From<serde_json::Error> for OAuth2Error {
    fn from(err: serde_json::Error) -> Self {
        OAuth2Error::SerializationError(err.to_string())
    }
}

impl From<::config::ConfigError> for OAuth2Error {
    fn from(err: ::config::ConfigError) -> Self {
        OAuth2Error::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(OAuth2Error::TransportError("connection reset".to_string()).is_retryable());
        assert!(!OAuth2Error::AuthenticationRequired("github".to_string()).is_retryable());
        assert!(
            !OAuth2Error::TokenExchangeFailed {
                status: 400,
                error: "invalid_grant".to_string(),
                description: None,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_token_exchange_error_message() {
        let err = OAuth2Error::TokenExchangeFailed {
            status: 401,
            error: "invalid_client".to_string(),
            description: Some("Client authentication failed".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Token exchange failed with status 401: invalid_client"
        );
    }
}
